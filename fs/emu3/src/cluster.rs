//! FAT-style cluster allocation table: one `u16` per cluster, `0` meaning
//! free and `0x7FFF` meaning end-of-chain. Cluster numbering is 1-based;
//! entry 0 is never used and always stays `0`.

use emu3fs_ds::DataStorage;
use emu3fs_api::{Error, Result};
use zerocopy::little_endian::U16;

use crate::block_io::{BlockIo, BLOCK_SIZE};
use crate::superblock::Region;

pub const FREE: u16 = 0x0000;
pub const END: u16 = 0x7FFF;

const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 2;

/// The whole cluster-allocation table, held in memory for the life of the
/// mount and written back entry-by-entry as it changes.
pub struct ClusterChain {
    region: Region,
    entries: Vec<u16>,
}

impl ClusterChain {
    /// Reads every block of `region` and assembles the in-memory table.
    /// `cluster_count` bounds the logical size; the table itself is sized to
    /// the region's full block capacity since the original format doesn't
    /// distinguish "beyond cluster_count" slots from padding.
    pub fn load<DS: DataStorage>(io: &BlockIo<DS>, region: Region) -> Result<Self> {
        let capacity = region.len as usize * ENTRIES_PER_BLOCK;
        let mut entries = Vec::with_capacity(capacity);
        for i in 0..region.len as u64 {
            let buffer = io.read(region.start as u64 + i)?;
            for chunk in buffer.data().chunks_exact(2) {
                let raw = U16::from_bytes([chunk[0], chunk[1]]);
                entries.push(raw.get());
            }
            buffer.release()?;
        }
        Ok(Self { region, entries })
    }

    fn entry_location(&self, cluster: u32) -> (u64, usize) {
        let index = cluster as usize;
        let block_index = index / ENTRIES_PER_BLOCK;
        let offset_in_block = (index % ENTRIES_PER_BLOCK) * 2;
        (self.region.start as u64 + block_index as u64, offset_in_block)
    }

    fn get(&self, cluster: u32) -> u16 {
        self.entries[cluster as usize]
    }

    fn set<DS: DataStorage>(&mut self, io: &BlockIo<DS>, cluster: u32, value: u16) -> Result<()> {
        self.entries[cluster as usize] = value;
        let (block, offset) = self.entry_location(cluster);
        let mut buffer = io.read(block)?;
        buffer.data_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        buffer.mark_dirty();
        buffer.release()
    }

    /// First cluster whose entry is `FREE`, scanning from 1. The original
    /// driver scans linearly from the start of the table on every
    /// allocation; we keep that behavior rather than tracking a free list.
    pub fn next_free(&self) -> Result<u32> {
        for cluster in 1..self.entries.len() as u32 {
            if self.get(cluster) == FREE {
                return Ok(cluster);
            }
        }
        Err(Error::NoSpace)
    }

    /// Walks the chain starting at `start`, returning every cluster visited
    /// in order. Bounded by the table size so a corrupt on-disk cycle can't
    /// hang the caller.
    pub fn follow(&self, start: u32) -> Result<Vec<u32>> {
        if start == 0 {
            return Ok(Vec::new());
        }
        let mut visited = Vec::new();
        let mut cluster = start;
        loop {
            visited.push(cluster);
            if visited.len() > self.entries.len() {
                return Err(Error::InvalidGeometry);
            }
            let next = self.get(cluster);
            if next == END {
                return Ok(visited);
            }
            if next == FREE {
                return Err(Error::InvalidGeometry);
            }
            cluster = next as u32;
        }
    }

    /// Extends the chain rooted at `start` (or creates one, if `start` is 0)
    /// so it has `total` clusters, allocating new ones from [`next_free`].
    /// Returns the (possibly unchanged) start cluster.
    pub fn grow<DS: DataStorage>(&mut self, io: &BlockIo<DS>, start: u32, total: u32) -> Result<u32> {
        if total == 0 {
            return Ok(start);
        }
        let mut chain = self.follow(start)?;
        if chain.is_empty() {
            let first = self.next_free()?;
            self.set(io, first, END)?;
            chain.push(first);
        }
        while (chain.len() as u32) < total {
            let new = self.next_free()?;
            let tail = *chain.last().expect("chain is never empty here");
            self.set(io, tail, new as u16)?;
            self.set(io, new, END)?;
            chain.push(new);
        }
        Ok(chain[0])
    }

    /// Truncates the chain rooted at `start` to its first `clusters` nodes,
    /// freeing everything past that point. `clusters == 0` frees the whole
    /// chain and returns 0 as the new start.
    pub fn prune_to<DS: DataStorage>(&mut self, io: &BlockIo<DS>, start: u32, clusters: u32) -> Result<u32> {
        if clusters == 0 {
            self.free_chain(io, start)?;
            return Ok(0);
        }
        let chain = self.follow(start)?;
        if (chain.len() as u32) <= clusters {
            return Ok(start);
        }
        let keep = &chain[..clusters as usize];
        let last_kept = *keep.last().expect("clusters >= 1 here");
        self.set(io, last_kept, END)?;
        for &cluster in &chain[clusters as usize..] {
            self.set(io, cluster, FREE)?;
        }
        Ok(start)
    }

    /// Frees every cluster in the chain rooted at `start`.
    pub fn free_chain<DS: DataStorage>(&mut self, io: &BlockIo<DS>, start: u32) -> Result<()> {
        if start == 0 {
            return Ok(());
        }
        for cluster in self.follow(start)? {
            self.set(io, cluster, FREE)?;
        }
        Ok(())
    }

    pub fn free_count(&self) -> u64 {
        self.entries.iter().skip(1).filter(|&&e| e == FREE).count() as u64
    }

    pub fn total_count(&self) -> u64 {
        self.entries.len().saturating_sub(1) as u64
    }
}
