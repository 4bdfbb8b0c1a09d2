//! Tracks which blocks of the directory-content region are in use.
//!
//! The on-disk format carries no free-block bitmap for this region: liveness
//! is implicit in which blocks are referenced by some directory's
//! [`crate::dentry::DirAttrs::block_list`]. This type is the in-memory
//! reconstruction built once at mount time by [`crate::dir::DirectoryEngine`]
//! and kept in sync as directories grow and shrink.

use emu3fs_api::{Error, Result};

use crate::superblock::Region;

pub struct DirBlockBitmap {
    region: Region,
    used: Vec<bool>,
}

impl DirBlockBitmap {
    /// Builds an all-free bitmap sized to `region`. Callers mark blocks used
    /// as they walk the directory tree at mount time.
    pub fn new(region: Region) -> Self {
        Self {
            region,
            used: vec![false; region.len as usize],
        }
    }

    fn index(&self, block: u16) -> Result<usize> {
        let offset = block as u32;
        if offset < self.region.start || offset >= self.region.start + self.region.len {
            return Err(Error::InvalidGeometry);
        }
        Ok((offset - self.region.start) as usize)
    }

    pub fn mark_used(&mut self, block: u16) -> Result<()> {
        let index = self.index(block)?;
        self.used[index] = true;
        Ok(())
    }

    pub fn is_used(&self, block: u16) -> bool {
        self.index(block).map(|i| self.used[i]).unwrap_or(false)
    }

    /// Reserves and returns the first free block in the region.
    pub fn reserve(&mut self) -> Result<u16> {
        let slot = self
            .used
            .iter()
            .position(|&used| !used)
            .ok_or(Error::NoSpace)?;
        self.used[slot] = true;
        Ok(self.region.start as u16 + slot as u16)
    }

    pub fn free(&mut self, block: u16) -> Result<()> {
        let index = self.index(block)?;
        self.used[index] = false;
        Ok(())
    }

    pub fn free_count(&self) -> u64 {
        self.used.iter().filter(|&&u| !u).count() as u64
    }

    pub fn total_count(&self) -> u64 {
        self.used.len() as u64
    }
}
