//! Parses the on-disk header (block 0) into opaque [`Geometry`].

use std::mem::size_of;

use emu3fs_api::{Error, Result};
use log::error;
use zerocopy::{little_endian::U32, FromBytes, Immutable, KnownLayout};

use crate::block_io::BLOCK_SIZE;

const SIGNATURE: &[u8; 4] = b"EMU3";

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
struct RawSuperblock {
    signature: [u8; 4],
    total_blocks: U32,
    root_start: U32,
    root_len: U32,
    dir_content_start: U32,
    dir_content_len: U32,
    cluster_list_start: U32,
    cluster_list_len: U32,
    data_start: U32,
    cluster_count: U32,
}

const CLUSTER_EXP_OFFSET: usize = 0x28;

/// Which of the two historical on-disk variants this mount speaks. The two
/// share one code path; this flag only changes a handful of directory and
/// rename permission checks (see [`crate::dir::DirectoryEngine`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    V3,
    V4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub len: u32,
}

impl Region {
    fn end(&self) -> u64 {
        self.start as u64 + self.len as u64
    }
}

#[derive(Debug, Clone)]
pub struct Geometry {
    pub total_blocks: u32,
    pub root: Region,
    pub dir_content: Region,
    pub cluster_list: Region,
    pub data_start: u32,
    pub blocks_per_cluster: u32,
    pub cluster_count: u32,
    pub variant: Variant,
}

impl Geometry {
    /// Parses block 0. `device_blocks` is the total block count backing the
    /// medium, used to confirm every region fits.
    pub fn parse(block0: &[u8; BLOCK_SIZE], variant: Variant, device_blocks: u64) -> Result<Self> {
        let raw = RawSuperblock::read_from_bytes(&block0[..size_of::<RawSuperblock>()])
            .map_err(|_| Error::InvalidGeometry)?;

        if &raw.signature != SIGNATURE {
            error!("volume signature {:?} is not \"EMU3\"", raw.signature);
            return Err(Error::InvalidSignature);
        }

        let cluster_exp = block0[CLUSTER_EXP_OFFSET];
        if cluster_exp == 0 {
            error!("cluster size exponent is 0, which the original driver cannot shift by");
            return Err(Error::InvalidGeometry);
        }

        let cluster_bytes = 1u64 << (15 + cluster_exp as u32);
        if cluster_bytes % BLOCK_SIZE as u64 != 0 {
            return Err(Error::InvalidGeometry);
        }
        let blocks_per_cluster = (cluster_bytes / BLOCK_SIZE as u64) as u32;
        if !blocks_per_cluster.is_power_of_two() || blocks_per_cluster < 64 {
            error!("blocks per cluster ({blocks_per_cluster}) shall be a power of two >= 64");
            return Err(Error::InvalidGeometry);
        }

        let root = Region {
            start: raw.root_start.get(),
            len: raw.root_len.get(),
        };
        let dir_content = Region {
            start: raw.dir_content_start.get(),
            len: raw.dir_content_len.get(),
        };
        let cluster_list = Region {
            start: raw.cluster_list_start.get(),
            len: raw.cluster_list_len.get(),
        };
        let data_start = raw.data_start.get();

        let mut cluster_count = raw.cluster_count.get();
        if cluster_exp >= 5 {
            cluster_count /= 2;
        }

        let geometry = Self {
            total_blocks: raw.total_blocks.get(),
            root,
            dir_content,
            cluster_list,
            data_start,
            blocks_per_cluster,
            cluster_count,
            variant,
        };
        geometry.validate(device_blocks)?;
        Ok(geometry)
    }

    fn validate(&self, device_blocks: u64) -> Result<()> {
        let regions = [self.root, self.dir_content, self.cluster_list];
        for pair in regions.windows(2) {
            if pair[0].end() > pair[1].start as u64 {
                error!("superblock regions overlap or are out of order");
                return Err(Error::InvalidGeometry);
            }
        }
        if self.cluster_list.end() > self.data_start as u64 {
            error!("cluster list overruns the data area start");
            return Err(Error::InvalidGeometry);
        }
        let data_end =
            self.data_start as u64 + self.cluster_count as u64 * self.blocks_per_cluster as u64;
        if data_end > device_blocks {
            error!(
                "data area end ({data_end}) exceeds device size ({device_blocks} blocks)"
            );
            return Err(Error::InvalidGeometry);
        }
        Ok(())
    }

    pub fn root_blocks(&self) -> u32 {
        self.root.len
    }

    pub fn dir_content_blocks(&self) -> u32 {
        self.dir_content.len
    }

    pub fn cluster_list_blocks(&self) -> u32 {
        self.cluster_list.len
    }
}
