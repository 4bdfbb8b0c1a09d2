//! POSIX-shaped filesystem contract implemented by `emu3fs_driver`.
//!
//! This mirrors the split the driver's teacher workspace uses: a
//! dependency-light trait crate that any on-disk format could implement,
//! kept separate from the crate that actually knows how to parse bytes.

pub use emu3fs_err::*;

use bitflags::bitflags;

/// Reserved inode id of the filesystem root, stable across every mount.
pub const ROOT_INO: u64 = 1;

pub const BANK_NUMBER_XATTR: &str = "user.bank.number";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Attributes the host asks for on `lookup`/`getattr`/`create`/`setattr`.
///
/// The hardware format carries no timestamps; callers fabricate them at
/// inode load time, outside this crate.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub ino: u64,
    pub kind: FileKind,
    pub size: u64,
}

/// One entry yielded by [`FileSystem::readdir`]. `offset` is the cursor to
/// pass back in to resume iteration after this entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileKind,
    pub name: String,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_avail: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_len: u32,
    pub fsid: u64,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RenameFlags: u32 {
        const NO_REPLACE = 1 << 0;
    }
}

/// The entry points a host operating system's mount/page-cache glue calls
/// into. Everything below this trait is this crate's concern; the trait
/// itself is deliberately thin so more than one on-disk format could
/// implement it.
pub trait FileSystem {
    fn statfs(&self) -> Result<StatFs>;

    fn lookup(&self, parent: u64, name: &str) -> Result<Attr>;

    fn getattr(&self, ino: u64) -> Result<Attr>;

    /// Returns the entry at `cursor`, or `None` once iteration is exhausted.
    /// Cursors 0 and 1 are always `.` and `..`.
    fn readdir(&self, parent: u64, cursor: u64) -> Result<Option<DirEntry>>;

    fn create(&self, parent: u64, name: &str) -> Result<Attr>;

    fn unlink(&self, parent: u64, name: &str) -> Result<()>;

    fn mkdir(&self, parent: u64, name: &str) -> Result<Attr>;

    fn rmdir(&self, parent: u64, name: &str) -> Result<()>;

    fn rename(
        &self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
        flags: RenameFlags,
    ) -> Result<()>;

    fn read(&self, ino: u64, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    fn write(&self, ino: u64, offset: u64, buffer: &[u8]) -> Result<usize>;

    fn setattr(&self, ino: u64, size: u64) -> Result<Attr>;

    fn listxattr(&self, ino: u64) -> Result<Vec<String>>;

    fn getxattr(&self, ino: u64, name: &str) -> Result<Vec<u8>>;

    fn setxattr(&self, ino: u64, name: &str, value: &[u8]) -> Result<()>;
}
