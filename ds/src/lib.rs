//! Storage-medium abstraction for the emu3fs driver.
//!
//! A [`DataStorage`] is anything that can be read and written at an
//! arbitrary byte offset: a disk image file, a raw block device, or (in
//! tests) an in-memory buffer. The driver builds its 512-byte [`BlockIO`]
//! buffer discipline on top of this.

pub use emu3fs_err::*;

pub trait DataStorage: Send + Sync {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;

    /// Total size of the medium in bytes, if known.
    fn len(&self) -> Result<u64>;
}
