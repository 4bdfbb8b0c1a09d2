//! Uniform 512-byte block read/write-back interface. Every higher layer
//! goes through this; nothing else touches the [`DataStorage`] directly.

use emu3fs_ds::DataStorage;
use emu3fs_api::{Error, Result};
use log::error;

pub const BLOCK_SIZE: usize = 512;

pub struct BlockIo<DS> {
    storage: DS,
}

impl<DS: DataStorage> BlockIo<DS> {
    pub fn new(storage: DS) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &DS {
        &self.storage
    }

    pub fn read(&self, block: u64) -> Result<Buffer<'_, DS>> {
        let mut data = [0u8; BLOCK_SIZE];
        self.storage
            .read(block * BLOCK_SIZE as u64, &mut data)
            .map_err(|_| Error::BlockUnreadable(block))?;
        Ok(Buffer {
            io: self,
            block,
            data,
            dirty: false,
            released: false,
        })
    }

    /// Zero-filled buffer for a block that is about to be fully overwritten
    /// (e.g. a freshly reserved dir-content block), skipping the read.
    pub fn zeroed(&self, block: u64) -> Buffer<'_, DS> {
        Buffer {
            io: self,
            block,
            data: [0u8; BLOCK_SIZE],
            dirty: true,
            released: false,
        }
    }

    fn flush(&self, block: u64, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.storage.write(block * BLOCK_SIZE as u64, data)
    }
}

/// A single in-flight block buffer. Acquired from [`BlockIo::read`], mutated
/// in place, and released on every exit path including error paths: the
/// `Drop` impl flushes a still-dirty buffer so a `?` out of a function body
/// can never leak an unwritten block.
pub struct Buffer<'a, DS: DataStorage> {
    io: &'a BlockIo<DS>,
    block: u64,
    data: [u8; BLOCK_SIZE],
    dirty: bool,
    released: bool,
}

impl<'a, DS: DataStorage> Buffer<'a, DS> {
    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }

    /// Marks the buffer dirty. The write itself is deferred until
    /// `release` or an explicit `sync`.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Flushes the buffer now, whether or not it is dirty.
    pub fn sync(&mut self) -> Result<()> {
        self.io.flush(self.block, &self.data)?;
        self.dirty = false;
        Ok(())
    }

    /// Releases the buffer, flushing it first if it was left dirty.
    pub fn release(mut self) -> Result<()> {
        let result = if self.dirty {
            self.io.flush(self.block, &self.data)
        } else {
            Ok(())
        };
        self.released = true;
        result
    }
}

impl<'a, DS: DataStorage> Drop for Buffer<'a, DS> {
    fn drop(&mut self) {
        if !self.released && self.dirty {
            if let Err(err) = self.io.flush(self.block, &self.data) {
                error!("failed to flush dirty block {} on drop: {err}", self.block);
            }
        }
    }
}
