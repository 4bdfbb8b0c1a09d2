//! File content operations: cluster-chain-backed reads and writes, and the
//! size <-> (clusters, blocks, bytes) encoding stored in a file's dentry.

use emu3fs_api::{Error, Result};
use emu3fs_ds::DataStorage;

use crate::block_io::{BlockIo, BLOCK_SIZE};
use crate::cluster::ClusterChain;
use crate::dentry::FileAttrs;
use crate::superblock::Geometry;

/// Encodes a byte size into the three fields the on-disk format stores it
/// as. `bytes` is the count of valid bytes in the final block and is never
/// `0` except for a genuinely empty file (where `clusters == blocks == 1`
/// and every field is `0`); a file whose size lands exactly on a block
/// boundary reports a full `512` there instead.
pub fn encode_size(size: u64, cluster_bytes: u64) -> (u16, u16, u16) {
    if size == 0 {
        return (1, 1, 0);
    }
    let clusters = (size - 1) / cluster_bytes + 1;
    let in_cluster = size - (clusters - 1) * cluster_bytes;
    let blocks = (in_cluster - 1) / BLOCK_SIZE as u64 + 1;
    let bytes = in_cluster - (blocks - 1) * BLOCK_SIZE as u64;
    (clusters as u16, blocks as u16, bytes as u16)
}

pub fn decode_size(clusters: u16, blocks: u16, bytes: u16, cluster_bytes: u64) -> u64 {
    if clusters == 0 {
        return 0;
    }
    (clusters as u64 - 1) * cluster_bytes
        + (blocks as u64 - 1) * BLOCK_SIZE as u64
        + bytes as u64
}

pub struct FileEngine<'a, DS> {
    pub io: &'a BlockIo<DS>,
    pub geometry: &'a Geometry,
    pub clusters: &'a mut ClusterChain,
}

impl<'a, DS: DataStorage> FileEngine<'a, DS> {
    fn cluster_bytes(&self) -> u64 {
        self.geometry.blocks_per_cluster as u64 * BLOCK_SIZE as u64
    }

    /// Absolute disk block for the `offset`'th block (0-based) of `cluster`.
    fn phys_block(&self, cluster: u32, offset: u32) -> u64 {
        self.geometry.data_start as u64
            + (cluster as u64 - 1) * self.geometry.blocks_per_cluster as u64
            + offset as u64
    }

    pub fn size(&self, attrs: &FileAttrs) -> u64 {
        decode_size(attrs.clusters, attrs.blocks, attrs.bytes, self.cluster_bytes())
    }

    /// Reads into `buffer`, starting at `offset` bytes into the file.
    /// Returns the number of bytes actually read, which is less than
    /// `buffer.len()` once the read runs past end of file.
    pub fn read(&self, attrs: &FileAttrs, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let size = self.size(attrs);
        if offset >= size {
            return Ok(0);
        }
        let to_read = buffer.len().min((size - offset) as usize);
        let chain = self.clusters.follow(attrs.start_cluster as u32)?;
        let mut read = 0;
        while read < to_read {
            let pos = offset + read as u64;
            let cluster_bytes = self.cluster_bytes();
            let cluster_index = (pos / cluster_bytes) as usize;
            let within_cluster = pos % cluster_bytes;
            let block_offset = (within_cluster / BLOCK_SIZE as u64) as u32;
            let byte_offset = (within_cluster % BLOCK_SIZE as u64) as usize;
            let cluster = *chain.get(cluster_index).ok_or(Error::InvalidGeometry)?;
            let block = self.phys_block(cluster, block_offset);
            let data = self.io.read(block)?;
            let available = BLOCK_SIZE - byte_offset;
            let take = available.min(to_read - read);
            buffer[read..read + take].copy_from_slice(&data.data()[byte_offset..byte_offset + take]);
            data.release()?;
            read += take;
        }
        Ok(read)
    }

    /// Writes `buffer` at `offset`, growing the cluster chain as needed.
    /// Returns the updated attrs; the caller is responsible for persisting
    /// them into the owning dentry.
    pub fn write(&mut self, attrs: &FileAttrs, offset: u64, buffer: &[u8]) -> Result<FileAttrs> {
        let end = offset + buffer.len() as u64;
        let cluster_bytes = self.cluster_bytes();
        let current_size = self.size(attrs);
        let new_size = end.max(current_size);
        let clusters_needed = (new_size.max(1) - 1) / cluster_bytes + 1;

        let start_cluster = self
            .clusters
            .grow(self.io, attrs.start_cluster as u32, clusters_needed as u32)?;
        let chain = self.clusters.follow(start_cluster)?;

        let mut written = 0;
        while written < buffer.len() {
            let pos = offset + written as u64;
            let cluster_index = (pos / cluster_bytes) as usize;
            let within_cluster = pos % cluster_bytes;
            let block_offset = (within_cluster / BLOCK_SIZE as u64) as u32;
            let byte_offset = (within_cluster % BLOCK_SIZE as u64) as usize;
            let cluster = *chain.get(cluster_index).ok_or(Error::InvalidGeometry)?;
            let block = self.phys_block(cluster, block_offset);

            let mut data = if byte_offset == 0 && buffer.len() - written >= BLOCK_SIZE {
                self.io.zeroed(block)
            } else {
                self.io.read(block)?
            };
            let available = BLOCK_SIZE - byte_offset;
            let take = available.min(buffer.len() - written);
            data.data_mut()[byte_offset..byte_offset + take]
                .copy_from_slice(&buffer[written..written + take]);
            data.mark_dirty();
            data.release()?;
            written += take;
        }

        let (clusters, blocks, bytes) = encode_size(new_size, cluster_bytes);
        Ok(FileAttrs {
            start_cluster: start_cluster as u16,
            clusters,
            blocks,
            bytes,
            file_type: attrs.file_type,
            props: attrs.props,
        })
    }

    /// Truncates or extends a file's logical size without touching its
    /// content, freeing clusters past the new end and leaving any newly
    /// exposed bytes in a grown file undefined (matching the original
    /// driver, which never zero-fills on truncate-then-extend).
    pub fn set_size(&mut self, attrs: &FileAttrs, new_size: u64) -> Result<FileAttrs> {
        let cluster_bytes = self.cluster_bytes();
        let (clusters, blocks, bytes) = encode_size(new_size, cluster_bytes);
        let current_size = self.size(attrs);
        let start_cluster = if new_size == 0 {
            self.clusters.free_chain(self.io, attrs.start_cluster as u32)?;
            0
        } else if new_size > current_size {
            self.clusters
                .grow(self.io, attrs.start_cluster as u32, clusters as u32)?
        } else {
            self.clusters
                .prune_to(self.io, attrs.start_cluster as u32, clusters as u32)?
        };
        Ok(FileAttrs {
            start_cluster: start_cluster as u16,
            clusters,
            blocks,
            bytes,
            file_type: attrs.file_type,
            props: attrs.props,
        })
    }
}
