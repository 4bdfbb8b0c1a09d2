//! Directory tree operations: the format has exactly two levels, a fixed
//! root area and, for each root-level directory, up to seven directory-
//! content blocks holding that directory's files.

use emu3fs_api::{Error, Result};
use emu3fs_ds::DataStorage;

use crate::bitmap::DirBlockBitmap;
use crate::block_io::BlockIo;
use crate::dentry::{
    Classification, DentryTable, Dentry, DirAttrs, FileAttrs, Tail, DENTRIES_PER_BLOCK,
};
use crate::inode::InodeMap;
use crate::superblock::{Geometry, Variant};

/// A resolved dentry location plus the data every caller needs to act on it.
#[derive(Debug, Clone, Copy)]
pub struct Located {
    pub ino: u64,
    pub block: u32,
    pub slot: u8,
    pub dentry: Dentry,
}

pub struct DirectoryEngine<'a, DS> {
    pub io: &'a BlockIo<DS>,
    pub geometry: &'a Geometry,
    pub bitmap: &'a mut DirBlockBitmap,
    pub inodes: &'a mut InodeMap,
}

impl<'a, DS: DataStorage> DirectoryEngine<'a, DS> {
    pub fn is_root(&self, ino: u64) -> bool {
        ino == emu3fs_api::ROOT_INO
    }

    /// Absolute blocks backing `parent`'s content: the fixed root region for
    /// the root directory, or a subdirectory's `block_list` otherwise.
    fn content_blocks(&mut self, parent: u64) -> Result<Vec<u32>> {
        if self.is_root(parent) {
            return Ok((0..self.geometry.root_blocks())
                .map(|i| self.geometry.root.start + i)
                .collect());
        }
        let (block, slot) = self.inodes.location_of(parent)?;
        let dentry = self.read_dentry(block, slot)?;
        match dentry.classify() {
            Classification::Dir => {
                let attrs = dentry.dir_attrs().expect("classified as Dir");
                Ok(attrs.used_blocks().map(u32::from).collect())
            }
            _ => Err(Error::NotADirectory),
        }
    }

    fn read_dentry(&self, block: u32, slot: u8) -> Result<Dentry> {
        let buffer = self.io.read(block as u64)?;
        let dentry = DentryTable::read_slot(buffer.data(), slot as usize);
        buffer.release()?;
        Ok(dentry)
    }

    pub(crate) fn write_dentry(&self, block: u32, slot: u8, dentry: &Dentry) -> Result<()> {
        let mut buffer = self.io.read(block as u64)?;
        DentryTable::write_slot(buffer.data_mut(), slot as usize, dentry);
        buffer.mark_dirty();
        buffer.release()
    }

    fn locate(&mut self, parent: u64, name: &str) -> Result<Option<Located>> {
        let blocks = self.content_blocks(parent)?;
        for block in blocks {
            for slot in 0..DENTRIES_PER_BLOCK as u8 {
                let dentry = self.read_dentry(block, slot)?;
                if dentry.classify() == Classification::Free {
                    continue;
                }
                let stored = DentryTable::strip(&dentry.name);
                if DentryTable::names_match(name, &stored) {
                    let ino = self.inodes.ino_for(block, slot);
                    return Ok(Some(Located { ino, block, slot, dentry }));
                }
            }
        }
        Ok(None)
    }

    pub fn lookup(&mut self, parent: u64, name: &str) -> Result<Located> {
        self.locate(parent, name)?.ok_or(Error::NotFound)
    }

    /// Yields live entries of `parent` in on-disk slot order, skipping
    /// `skip` of them. Used to implement a stable readdir cursor: cursor 0
    /// and 1 are `.`/`..`, handled by the caller; cursor `n >= 2` means
    /// "the `n - 2`'th live entry".
    pub fn nth_entry(&mut self, parent: u64, skip: u64) -> Result<Option<Located>> {
        let blocks = self.content_blocks(parent)?;
        let mut seen = 0u64;
        for block in blocks {
            for slot in 0..DENTRIES_PER_BLOCK as u8 {
                let dentry = self.read_dentry(block, slot)?;
                if dentry.classify() == Classification::Free {
                    continue;
                }
                if seen == skip {
                    let ino = self.inodes.ino_for(block, slot);
                    return Ok(Some(Located { ino, block, slot, dentry }));
                }
                seen += 1;
            }
        }
        Ok(None)
    }

    /// Finds a free dentry slot in `parent`, reserving a new dir-content
    /// block and appending it to `parent`'s `block_list` if every existing
    /// block is full but `block_list` still has room for another.
    fn find_free_slot(&mut self, parent: u64) -> Result<(u32, u8)> {
        let blocks = self.content_blocks(parent)?;
        for block in blocks {
            for slot in 0..DENTRIES_PER_BLOCK as u8 {
                let dentry = self.read_dentry(block, slot)?;
                if dentry.classify() == Classification::Free {
                    return Ok((block, slot));
                }
            }
        }
        if self.is_root(parent) {
            return Err(Error::NoSpace);
        }
        let (parent_block, parent_slot) = self.inodes.location_of(parent)?;
        let parent_dentry = self.read_dentry(parent_block, parent_slot)?;
        let mut attrs = parent_dentry.dir_attrs().ok_or(Error::NotADirectory)?;
        let free_index = attrs.free_slot().ok_or(Error::NoSpace)?;

        let new_block = self.bitmap.reserve()?;
        let mut content = self.io.zeroed(new_block as u64);
        content.mark_dirty();
        content.release()?;

        attrs.block_list[free_index] = new_block as i16;
        let mut updated_parent = parent_dentry;
        updated_parent.tail = Tail::Dir(attrs);
        self.write_dentry(parent_block, parent_slot, &updated_parent)?;

        Ok((new_block as u32, 0))
    }

    /// Creates a new, zero-length regular file in `parent`.
    pub fn create(&mut self, parent: u64, name: &str) -> Result<Located> {
        if self.is_root(parent) && self.geometry.variant == Variant::V3 {
            return Err(Error::PermissionDenied);
        }
        if self.locate(parent, name)?.is_some() {
            return Err(Error::Exists);
        }
        let (block, slot) = self.find_free_slot(parent)?;
        let dentry = Dentry {
            name: DentryTable::set_name(name)?,
            unknown: 0,
            id: next_file_id(self, parent)?,
            tail: Tail::File(FileAttrs {
                start_cluster: 0,
                clusters: 0,
                blocks: 0,
                bytes: 0,
                file_type: 0x81,
                props: [0; 5],
            }),
        };
        self.write_dentry(block, slot, &dentry)?;
        let ino = self.inodes.ino_for(block, slot);
        Ok(Located { ino, block, slot, dentry })
    }

    /// Removes a file's dentry, marking it deleted rather than clearing it:
    /// the original driver leaves name and start cluster in place on
    /// unlink, only flipping the type byte to the tombstone value.
    pub fn unlink(&mut self, parent: u64, name: &str) -> Result<Located> {
        let located = self.lookup(parent, name)?;
        let attrs = located
            .dentry
            .file_attrs()
            .ok_or(Error::IsADirectory)?;
        let mut dentry = located.dentry;
        dentry.tail = Tail::File(FileAttrs { file_type: 0x00, ..attrs });
        self.write_dentry(located.block, located.slot, &dentry)?;
        self.inodes.release(located.block, located.slot);
        Ok(Located { dentry, ..located })
    }

    /// Creates a new root-level directory, reserving its first content
    /// block immediately (an empty directory still owns one block).
    pub fn mkdir(&mut self, parent: u64, name: &str) -> Result<Located> {
        if !self.is_root(parent) {
            return Err(Error::PermissionDenied);
        }
        if self.locate(parent, name)?.is_some() {
            return Err(Error::Exists);
        }
        let (block, slot) = self.find_free_slot(parent)?;
        let first_block = self.bitmap.reserve()?;
        let mut content = self.io.zeroed(first_block as u64);
        content.mark_dirty();
        content.release()?;

        let mut block_list = [-1i16; crate::dentry::BLOCKS_PER_DIR];
        block_list[0] = first_block as i16;
        let dentry = Dentry {
            name: DentryTable::set_name(name)?,
            unknown: 0,
            id: 0x40,
            tail: Tail::Dir(DirAttrs { block_list }),
        };
        self.write_dentry(block, slot, &dentry)?;
        let ino = self.inodes.ino_for(block, slot);
        Ok(Located { ino, block, slot, dentry })
    }

    pub fn rmdir(&mut self, parent: u64, name: &str) -> Result<()> {
        let located = self.lookup(parent, name)?;
        let attrs = located.dentry.dir_attrs().ok_or(Error::NotADirectory)?;
        let blocks: Vec<u32> = attrs.used_blocks().map(u32::from).collect();
        for &block in &blocks {
            for slot in 0..DENTRIES_PER_BLOCK as u8 {
                let dentry = self.read_dentry(block, slot)?;
                if dentry.classify() != Classification::Free {
                    return Err(Error::DirectoryNotEmpty);
                }
            }
        }
        for block in blocks {
            self.bitmap.free(block as u16)?;
        }
        let mut dentry = located.dentry;
        dentry.tail = Tail::Dir(DirAttrs { block_list: [0; crate::dentry::BLOCKS_PER_DIR] });
        self.write_dentry(located.block, located.slot, &dentry)?;
        self.inodes.release(located.block, located.slot);
        Ok(())
    }

    /// Moves a dentry between directories (or within one). `v3` volumes
    /// only ever rename within the same parent; a cross-directory request
    /// on a `v3` volume is rejected rather than silently reinterpreted.
    ///
    /// Returns the file attributes of a replaced target, if renaming over
    /// an existing file: the caller must release its cluster chain, since
    /// this engine has no [`crate::cluster::ClusterChain`] of its own.
    pub fn rename(
        &mut self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
        no_replace: bool,
    ) -> Result<Option<FileAttrs>> {
        if old_parent != new_parent && self.geometry.variant == Variant::V3 {
            return Err(Error::PermissionDenied);
        }
        let source = self.lookup(old_parent, old_name)?;
        let mut replaced = None;
        if let Some(existing) = self.locate(new_parent, new_name)? {
            if no_replace {
                return Err(Error::Exists);
            }
            if existing.dentry.classify() == Classification::Dir {
                return Err(Error::IsADirectory);
            }
            let mut tombstone = existing.dentry;
            if let Some(attrs) = tombstone.file_attrs() {
                tombstone.tail = Tail::File(FileAttrs { file_type: 0x00, ..attrs });
                replaced = Some(attrs);
            }
            self.write_dentry(existing.block, existing.slot, &tombstone)?;
            self.inodes.release(existing.block, existing.slot);
        }

        if old_parent == new_parent {
            let mut dentry = source.dentry;
            dentry.name = DentryTable::set_name(new_name)?;
            self.write_dentry(source.block, source.slot, &dentry)?;
            return Ok(replaced);
        }

        let (dest_block, dest_slot) = self.find_free_slot(new_parent)?;
        let mut dentry = source.dentry;
        dentry.name = DentryTable::set_name(new_name)?;
        if dentry.file_attrs().is_some() {
            dentry.id = next_file_id(self, new_parent)?;
        }
        self.write_dentry(dest_block, dest_slot, &dentry)?;

        let mut vacated = source.dentry;
        if let Some(attrs) = vacated.file_attrs() {
            vacated.tail = Tail::File(FileAttrs { file_type: 0x00, ..attrs });
        }
        self.write_dentry(source.block, source.slot, &vacated)?;
        self.inodes.release(source.block, source.slot);
        self.inodes.rekey((source.block, source.slot), (dest_block, dest_slot));
        Ok(replaced)
    }
}

/// File ids are small per-directory serials (`< 100`); this picks the
/// lowest one not already in use among the directory's live files.
fn next_file_id<DS: DataStorage>(
    engine: &mut DirectoryEngine<'_, DS>,
    parent: u64,
) -> Result<u8> {
    let blocks = engine.content_blocks(parent)?;
    let mut used = [false; crate::dentry::MAX_FILES_PER_DIR as usize];
    for block in blocks {
        for slot in 0..DENTRIES_PER_BLOCK as u8 {
            let dentry = engine.read_dentry(block, slot)?;
            if dentry.classify() == Classification::File {
                used[dentry.id as usize] = true;
            }
        }
    }
    used.iter()
        .position(|&u| !u)
        .map(|id| id as u8)
        .ok_or(Error::NoSpace)
}
