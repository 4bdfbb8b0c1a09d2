use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::Path,
};

use emu3fs_ds::{DataStorage, Error, Result};

/// A [`DataStorage`] backed by a regular file or block device node, opened
/// read/write. This is the "removable disk image" medium the driver targets.
pub struct FileDataStorage {
    file: File,
}

impl FileDataStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl DataStorage for FileDataStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buffer, offset).map_err(Error::Io)
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.file.write_all_at(buffer, offset).map_err(Error::Io)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
