//! Maps between the host-facing inode number and the on-disk dentry
//! location `dnum = (block << 4) | slot`. Rebuilt from scratch on every
//! mount; nothing here is persisted.

use std::collections::HashMap;

use emu3fs_api::{Error, Result, ROOT_INO};

/// Reserved dnum of the root directory. It doesn't correspond to a real
/// dentry slot, so it's never produced by [`InodeMap::dnum_to_key`].
const ROOT_DNUM: u32 = u32::MAX;

fn dnum_of(block: u32, slot: u8) -> u32 {
    (block << 4) | slot as u32
}

/// Bidirectional map between host inode numbers and `(block, slot)` dentry
/// locations. Inode numbers are assigned on first sight and stay stable for
/// the life of the mount; [`release`](Self::release) lets the engine recycle
/// a number once it's sure nothing still references it.
pub struct InodeMap {
    next_ino: u64,
    ino_to_dnum: HashMap<u64, u32>,
    dnum_to_ino: HashMap<u32, u64>,
}

impl InodeMap {
    pub fn new() -> Self {
        let mut map = Self {
            next_ino: ROOT_INO + 1,
            ino_to_dnum: HashMap::new(),
            dnum_to_ino: HashMap::new(),
        };
        map.ino_to_dnum.insert(ROOT_INO, ROOT_DNUM);
        map.dnum_to_ino.insert(ROOT_DNUM, ROOT_INO);
        map
    }

    /// Returns the inode number for `(block, slot)`, minting a new one if
    /// this location hasn't been seen yet this mount.
    pub fn ino_for(&mut self, block: u32, slot: u8) -> u64 {
        let dnum = dnum_of(block, slot);
        if let Some(&ino) = self.dnum_to_ino.get(&dnum) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.ino_to_dnum.insert(ino, dnum);
        self.dnum_to_ino.insert(dnum, ino);
        ino
    }

    /// Resolves an inode number back to its `(block, slot)` location. Fails
    /// for an inode the map has never minted or that has been released.
    pub fn location_of(&self, ino: u64) -> Result<(u32, u8)> {
        if ino == ROOT_INO {
            return Err(Error::IsADirectory);
        }
        let dnum = *self.ino_to_dnum.get(&ino).ok_or(Error::NotFound)?;
        Ok((dnum >> 4, (dnum & 0xF) as u8))
    }

    /// Drops the mapping for a dentry slot that has been unlinked, so a
    /// future slot reuse at the same location mints a fresh inode number
    /// instead of resurrecting the old one.
    pub fn release(&mut self, block: u32, slot: u8) {
        let dnum = dnum_of(block, slot);
        if let Some(ino) = self.dnum_to_ino.remove(&dnum) {
            self.ino_to_dnum.remove(&ino);
        }
    }

    /// Re-keys a mapping after a rename moves a dentry to a new slot,
    /// keeping the same inode number alive at the new location.
    pub fn rekey(&mut self, old: (u32, u8), new: (u32, u8)) {
        let old_dnum = dnum_of(old.0, old.1);
        let new_dnum = dnum_of(new.0, new.1);
        if let Some(ino) = self.dnum_to_ino.remove(&old_dnum) {
            self.ino_to_dnum.insert(ino, new_dnum);
            self.dnum_to_ino.insert(new_dnum, ino);
        }
    }
}

impl Default for InodeMap {
    fn default() -> Self {
        Self::new()
    }
}
