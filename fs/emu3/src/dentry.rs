//! Per-block view of 16 fixed-size dentries: recognizes free/file/directory/
//! tombstoned slots, and handles filename encoding, padding and comparison.

use emu3fs_api::{Error, Result};
use zerocopy::{
    little_endian::{I16, U16},
    transmute, FromBytes, Immutable, IntoBytes, KnownLayout,
};

pub const DENTRY_SIZE: usize = 32;
pub const DENTRIES_PER_BLOCK: usize = 16;
pub const NAME_LEN: usize = 16;
pub const BLOCKS_PER_DIR: usize = 7;
pub const MAX_FILES_PER_DIR: u16 = 100;

const FTYPE_DEL: u8 = 0x00;
const FTYPE_SYS: u8 = 0x80;
const FTYPE_STD: u8 = 0x81;
const FTYPE_UPD: u8 = 0x83;

const DIR_ID_A: u8 = 0x40;
const DIR_ID_B: u8 = 0x80;

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawDentry {
    name: [u8; NAME_LEN],
    unknown: u8,
    id: u8,
    tail: [u8; 14],
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawFileAttrs {
    start_cluster: U16,
    clusters: U16,
    blocks: U16,
    bytes: U16,
    file_type: u8,
    props: [u8; 5],
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawDirAttrs {
    block_list: [I16; BLOCKS_PER_DIR],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttrs {
    pub start_cluster: u16,
    pub clusters: u16,
    pub blocks: u16,
    pub bytes: u16,
    pub file_type: u8,
    pub props: [u8; 5],
}

impl FileAttrs {
    fn from_raw(raw: RawFileAttrs) -> Self {
        Self {
            start_cluster: raw.start_cluster.get(),
            clusters: raw.clusters.get(),
            blocks: raw.blocks.get(),
            bytes: raw.bytes.get(),
            file_type: raw.file_type,
            props: raw.props,
        }
    }

    fn to_raw(self) -> RawFileAttrs {
        RawFileAttrs {
            start_cluster: self.start_cluster.into(),
            clusters: self.clusters.into(),
            blocks: self.blocks.into(),
            bytes: self.bytes.into(),
            file_type: self.file_type,
            props: self.props,
        }
    }

    pub fn is_live(&self) -> bool {
        self.clusters > 0
            && matches!(self.file_type, FTYPE_STD | FTYPE_UPD | FTYPE_SYS)
    }

    pub fn is_deleted(&self) -> bool {
        self.clusters > 0 && self.file_type == FTYPE_DEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirAttrs {
    pub block_list: [i16; BLOCKS_PER_DIR],
}

impl DirAttrs {
    fn from_raw(raw: RawDirAttrs) -> Self {
        let mut block_list = [0i16; BLOCKS_PER_DIR];
        for (dst, src) in block_list.iter_mut().zip(raw.block_list.iter()) {
            *dst = src.get();
        }
        Self { block_list }
    }

    fn to_raw(self) -> RawDirAttrs {
        let mut block_list = [I16::ZERO; BLOCKS_PER_DIR];
        for (dst, src) in block_list.iter_mut().zip(self.block_list.iter()) {
            *dst = I16::from(*src);
        }
        RawDirAttrs { block_list }
    }

    pub fn is_live(&self) -> bool {
        self.block_list[0] > 0
    }

    /// Index of the first `-1` slot in `block_list`, if there is room for
    /// another dir-content block.
    pub fn free_slot(&self) -> Option<usize> {
        self.block_list.iter().position(|&b| b == -1)
    }

    /// The blocks actually in use, in order, stopping at the first `-1`.
    pub fn used_blocks(&self) -> impl Iterator<Item = u16> + '_ {
        self.block_list.iter().take_while(|&&b| b != -1).map(|&b| b as u16)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Tail {
    File(FileAttrs),
    Dir(DirAttrs),
}

#[derive(Debug, Clone, Copy)]
pub struct Dentry {
    pub name: [u8; NAME_LEN],
    pub unknown: u8,
    pub id: u8,
    pub tail: Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Free,
    File,
    Dir,
}

impl Dentry {
    /// Classifies this slot per spec: a slot is a file iff `id < 100`,
    /// `clusters > 0` and `type` is one of STD/UPD/SYS; a directory iff
    /// `id` is 0x40 or 0x80 and its first block-list entry is live.
    /// Everything else, including a tombstoned (DEL) file slot, is free.
    pub fn classify(&self) -> Classification {
        match self.tail {
            Tail::File(attrs) if self.id < MAX_FILES_PER_DIR as u8 && attrs.is_live() => {
                Classification::File
            }
            Tail::Dir(attrs) if matches!(self.id, DIR_ID_A | DIR_ID_B) && attrs.is_live() => {
                Classification::Dir
            }
            _ => Classification::Free,
        }
    }

    /// True for a slot that used to be a live file and was unlinked or
    /// renamed away, as opposed to one that was never written.
    pub fn is_deleted(&self) -> bool {
        match self.tail {
            Tail::File(attrs) => self.id < MAX_FILES_PER_DIR as u8 && attrs.is_deleted(),
            Tail::Dir(_) => false,
        }
    }

    pub fn file_attrs(&self) -> Option<FileAttrs> {
        match self.tail {
            Tail::File(attrs) => Some(attrs),
            Tail::Dir(_) => None,
        }
    }

    pub fn dir_attrs(&self) -> Option<DirAttrs> {
        match self.tail {
            Tail::Dir(attrs) => Some(attrs),
            Tail::File(_) => None,
        }
    }
}

/// Operations on the 16 fixed-size dentries packed into one 512-byte block.
pub struct DentryTable;

impl DentryTable {
    pub fn read_slot(block: &[u8; 512], slot: usize) -> Dentry {
        let offset = slot * DENTRY_SIZE;
        let raw = RawDentry::read_from_bytes(&block[offset..offset + DENTRY_SIZE])
            .expect("dentry slice is exactly DENTRY_SIZE bytes");
        let tail = if matches!(raw.id, DIR_ID_A | DIR_ID_B) {
            let raw_dir: RawDirAttrs = transmute!(raw.tail);
            Tail::Dir(DirAttrs::from_raw(raw_dir))
        } else {
            let raw_file: RawFileAttrs = transmute!(raw.tail);
            Tail::File(FileAttrs::from_raw(raw_file))
        };
        Dentry {
            name: raw.name,
            unknown: raw.unknown,
            id: raw.id,
            tail,
        }
    }

    pub fn write_slot(block: &mut [u8; 512], slot: usize, dentry: &Dentry) {
        let tail_bytes: [u8; 14] = match dentry.tail {
            Tail::File(attrs) => transmute!(attrs.to_raw()),
            Tail::Dir(attrs) => transmute!(attrs.to_raw()),
        };
        let raw = RawDentry {
            name: dentry.name,
            unknown: dentry.unknown,
            id: dentry.id,
            tail: tail_bytes,
        };
        let offset = slot * DENTRY_SIZE;
        raw.write_to(&mut block[offset..offset + DENTRY_SIZE])
            .expect("dentry slice is exactly DENTRY_SIZE bytes");
    }

    /// Strips the trailing ASCII-space padding from a raw 16-byte name.
    pub fn strip(name: &[u8; NAME_LEN]) -> String {
        let end = name.iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);
        String::from_utf8_lossy(&name[..end]).into_owned()
    }

    /// Pads `name` to 16 bytes with ASCII spaces, rejecting names that don't
    /// fit or are empty.
    pub fn set_name(name: &str) -> Result<[u8; NAME_LEN]> {
        if name.is_empty() {
            return Err(Error::NameEmpty);
        }
        if name.len() > NAME_LEN {
            return Err(Error::NameTooLong);
        }
        let mut bytes = [b' '; NAME_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(bytes)
    }

    /// The sampler's filenames may contain bytes a POSIX path cannot, namely
    /// `/`. This one-way mapping is what `readdir`/`lookup` show to the host;
    /// since it's lossy, comparisons must normalize both sides with it.
    pub fn filename_display(stripped: &str) -> String {
        stripped.replace('/', "?")
    }

    /// Compares a name as it is already shown to the host (e.g. a `lookup`
    /// argument) against a stripped on-disk name, applying the same
    /// normalization to both so a disk name containing `/` still matches the
    /// `?` the host sees.
    pub fn names_match(query: &str, stored_stripped: &str) -> bool {
        Self::filename_display(query) == Self::filename_display(stored_stripped)
    }
}
