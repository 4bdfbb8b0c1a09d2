//! Wraps the whole engine behind a single mutex and implements the
//! POSIX-shaped [`FileSystem`] trait the host calls into.
//!
//! Every mutating call takes the mutex for its entire duration: the format
//! has no on-disk locking of its own, so serializing here is what makes
//! concurrent callers safe. Buffers never outlive the call that acquired
//! them (see [`crate::block_io::Buffer`]'s `Drop`), so the lock is never
//! held across an I/O error waiting on a caller to clean up.

use std::sync::Mutex;

use log::warn;

use emu3fs_api::{
    Attr, DirEntry, Error, FileKind, FileSystem, RenameFlags, Result, StatFs, BANK_NUMBER_XATTR,
    ROOT_INO,
};
use emu3fs_ds::DataStorage;

use crate::bitmap::DirBlockBitmap;
use crate::block_io::BlockIo;
use crate::cluster::ClusterChain;
use crate::dentry::{Classification, DentryTable, MAX_FILES_PER_DIR};
use crate::dir::DirectoryEngine;
use crate::file::FileEngine;
use crate::inode::InodeMap;
use crate::superblock::{Geometry, Variant};

const BANK_NUMBER_LEN_MAX: usize = 8;

struct State<DS> {
    io: BlockIo<DS>,
    geometry: Geometry,
    clusters: ClusterChain,
    bitmap: DirBlockBitmap,
    inodes: InodeMap,
}

impl<DS: DataStorage> State<DS> {
    fn dir_engine(&mut self) -> DirectoryEngine<'_, DS> {
        DirectoryEngine {
            io: &self.io,
            geometry: &self.geometry,
            bitmap: &mut self.bitmap,
            inodes: &mut self.inodes,
        }
    }

    fn file_engine(&mut self) -> FileEngine<'_, DS> {
        FileEngine {
            io: &self.io,
            geometry: &self.geometry,
            clusters: &mut self.clusters,
        }
    }

    fn attr_of(&mut self, ino: u64) -> Result<Attr> {
        if ino == ROOT_INO {
            return Ok(Attr { ino, kind: FileKind::Directory, size: 0 });
        }
        let (block, slot) = self.inodes.location_of(ino)?;
        let dentry = {
            let buffer = self.io.read(block as u64)?;
            let dentry = DentryTable::read_slot(buffer.data(), slot as usize);
            buffer.release()?;
            dentry
        };
        match dentry.classify() {
            Classification::File => {
                let attrs = dentry.file_attrs().expect("classified as File");
                let size = self.file_engine().size(&attrs);
                Ok(Attr { ino, kind: FileKind::File, size })
            }
            Classification::Dir => Ok(Attr { ino, kind: FileKind::Directory, size: 0 }),
            Classification::Free => Err(Error::NotFound),
        }
    }

    /// Counts live files across the root and every root-level directory,
    /// plus the total dentry slots available: the original driver's statfs
    /// counts every slot the same way regardless of whether it's a file or
    /// a directory.
    fn counts(&mut self) -> Result<(u64, u64)> {
        let mut live = 0u64;
        let root_slots = self.geometry.root_blocks() as u64 * 16;
        let mut total = root_slots;

        let root_children: Vec<_> = {
            let mut engine = self.dir_engine();
            let mut out = Vec::new();
            let mut cursor = 0u64;
            while let Some(located) = engine.nth_entry(ROOT_INO, cursor)? {
                out.push(located);
                cursor += 1;
            }
            out
        };
        live += root_children.len() as u64;

        for child in &root_children {
            if child.dentry.classify() == Classification::Dir {
                let mut engine = self.dir_engine();
                let mut cursor = 0u64;
                while engine.nth_entry(child.ino, cursor)?.is_some() {
                    live += 1;
                    cursor += 1;
                }
            }
        }
        total += self.bitmap.total_count() * 16;
        Ok((live, total))
    }
}

/// Top-level driver handle; one instance per mount.
pub struct FsFacade<DS> {
    state: Mutex<State<DS>>,
}

impl<DS: DataStorage> FsFacade<DS> {
    /// Mounts `storage`, reading and validating the superblock and
    /// rebuilding the in-memory directory-block bitmap by walking every
    /// root-level directory once.
    pub fn mount(storage: DS, variant: Variant) -> Result<Self> {
        let device_blocks = storage.len()? / crate::block_io::BLOCK_SIZE as u64;
        let io = BlockIo::new(storage);
        let block0 = {
            let buffer = io.read(0)?;
            *buffer.data()
        };
        let geometry = Geometry::parse(&block0, variant, device_blocks)?;
        let clusters = ClusterChain::load(&io, geometry.cluster_list)?;
        let mut bitmap = DirBlockBitmap::new(geometry.dir_content);
        let mut inodes = InodeMap::new();

        {
            let mut engine = DirectoryEngine {
                io: &io,
                geometry: &geometry,
                bitmap: &mut bitmap,
                inodes: &mut inodes,
            };
            let mut cursor = 0u64;
            while let Some(located) = engine.nth_entry(ROOT_INO, cursor)? {
                if let Some(mut attrs) = located.dentry.dir_attrs() {
                    // The original driver has shipped volumes whose first
                    // dir-content blocks were numbered against a stale base
                    // address; repair them in place rather than failing the
                    // mount, the same tolerance `emu3_fix_first_dir_blocks`
                    // gives the two-level on-disk format.
                    let mut fixed = false;
                    for i in 0..crate::dentry::BLOCKS_PER_DIR {
                        if attrs.block_list[i] == -1 {
                            continue;
                        }
                        let expected = geometry.dir_content.start as i16 + i as i16;
                        if attrs.block_list[i] != expected {
                            warn!(
                                "directory {:?} block_list[{i}] was {}, expected {expected}; repairing",
                                DentryTable::strip(&located.dentry.name),
                                attrs.block_list[i],
                            );
                            attrs.block_list[i] = expected;
                            fixed = true;
                        }
                    }
                    if fixed {
                        let mut repaired = located.dentry;
                        repaired.tail = crate::dentry::Tail::Dir(attrs);
                        engine.write_dentry(located.block, located.slot, &repaired)?;
                    }
                    for block in attrs.used_blocks() {
                        engine.bitmap.mark_used(block)?;
                    }
                }
                cursor += 1;
            }
        }

        Ok(Self {
            state: Mutex::new(State { io, geometry, clusters, bitmap, inodes }),
        })
    }
}

fn to_dir_entry(located: &crate::dir::Located, stripped: &str) -> DirEntry {
    let kind = match located.dentry.classify() {
        Classification::Dir => FileKind::Directory,
        _ => FileKind::File,
    };
    DirEntry {
        ino: located.ino,
        kind,
        name: DentryTable::filename_display(stripped),
        offset: 0,
    }
}

impl<DS: DataStorage> FileSystem for FsFacade<DS> {
    fn statfs(&self) -> Result<StatFs> {
        let mut state = self.state.lock().unwrap();
        let (files, files_total) = state.counts()?;
        let cluster_blocks_free =
            state.clusters.free_count() * state.geometry.blocks_per_cluster as u64;
        Ok(StatFs {
            block_size: crate::block_io::BLOCK_SIZE as u32,
            blocks: state.geometry.total_blocks as u64,
            blocks_free: cluster_blocks_free + state.bitmap.free_count(),
            blocks_avail: cluster_blocks_free + state.bitmap.free_count(),
            files: files_total,
            files_free: files_total.saturating_sub(files),
            name_len: 16,
            fsid: 0,
        })
    }

    fn lookup(&self, parent: u64, name: &str) -> Result<Attr> {
        let mut state = self.state.lock().unwrap();
        let located = state.dir_engine().lookup(parent, name)?;
        state.attr_of(located.ino)
    }

    fn getattr(&self, ino: u64) -> Result<Attr> {
        let mut state = self.state.lock().unwrap();
        state.attr_of(ino)
    }

    fn readdir(&self, parent: u64, cursor: u64) -> Result<Option<DirEntry>> {
        let mut state = self.state.lock().unwrap();
        match cursor {
            0 => Ok(Some(DirEntry { ino: parent, kind: FileKind::Directory, name: ".".into(), offset: 1 })),
            1 => {
                // Every directory other than the root is itself a direct
                // child of the root, since the format has only two levels.
                Ok(Some(DirEntry { ino: ROOT_INO, kind: FileKind::Directory, name: "..".into(), offset: 2 }))
            }
            _ => {
                let skip = cursor - 2;
                let mut engine = state.dir_engine();
                match engine.nth_entry(parent, skip)? {
                    Some(located) => {
                        let stripped = DentryTable::strip(&located.dentry.name);
                        let mut entry = to_dir_entry(&located, &stripped);
                        entry.offset = cursor + 1;
                        Ok(Some(entry))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    fn create(&self, parent: u64, name: &str) -> Result<Attr> {
        let mut state = self.state.lock().unwrap();
        let located = state.dir_engine().create(parent, name)?;
        state.attr_of(located.ino)
    }

    fn unlink(&self, parent: u64, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let located = state.dir_engine().unlink(parent, name)?;
        let attrs = located.dentry.file_attrs().expect("unlink only returns files");
        state.file_engine().set_size(&attrs, 0)?;
        Ok(())
    }

    fn mkdir(&self, parent: u64, name: &str) -> Result<Attr> {
        let mut state = self.state.lock().unwrap();
        let located = state.dir_engine().mkdir(parent, name)?;
        state.attr_of(located.ino)
    }

    fn rmdir(&self, parent: u64, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.dir_engine().rmdir(parent, name)
    }

    fn rename(
        &self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
        flags: RenameFlags,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let replaced = state.dir_engine().rename(
            old_parent,
            old_name,
            new_parent,
            new_name,
            flags.contains(RenameFlags::NO_REPLACE),
        )?;
        if let Some(attrs) = replaced {
            state.file_engine().set_size(&attrs, 0)?;
        }
        Ok(())
    }

    fn read(&self, ino: u64, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let (block, slot) = state.inodes.location_of(ino)?;
        let dentry = {
            let buf = state.io.read(block as u64)?;
            let dentry = DentryTable::read_slot(buf.data(), slot as usize);
            buf.release()?;
            dentry
        };
        let attrs = dentry.file_attrs().ok_or(Error::IsADirectory)?;
        state.file_engine().read(&attrs, offset, buffer)
    }

    fn write(&self, ino: u64, offset: u64, buffer: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let (block, slot) = state.inodes.location_of(ino)?;
        let dentry = {
            let buf = state.io.read(block as u64)?;
            let dentry = DentryTable::read_slot(buf.data(), slot as usize);
            buf.release()?;
            dentry
        };
        let attrs = dentry.file_attrs().ok_or(Error::IsADirectory)?;
        let new_attrs = state.file_engine().write(&attrs, offset, buffer)?;
        let mut new_dentry = dentry;
        new_dentry.tail = crate::dentry::Tail::File(new_attrs);
        let mut buf = state.io.read(block as u64)?;
        DentryTable::write_slot(buf.data_mut(), slot as usize, &new_dentry);
        buf.mark_dirty();
        buf.release()?;
        Ok(buffer.len())
    }

    fn setattr(&self, ino: u64, size: u64) -> Result<Attr> {
        let mut state = self.state.lock().unwrap();
        let (block, slot) = state.inodes.location_of(ino)?;
        let dentry = {
            let buf = state.io.read(block as u64)?;
            let dentry = DentryTable::read_slot(buf.data(), slot as usize);
            buf.release()?;
            dentry
        };
        let attrs = dentry.file_attrs().ok_or(Error::IsADirectory)?;
        let new_attrs = state.file_engine().set_size(&attrs, size)?;
        let mut new_dentry = dentry;
        new_dentry.tail = crate::dentry::Tail::File(new_attrs);
        let mut buf = state.io.read(block as u64)?;
        DentryTable::write_slot(buf.data_mut(), slot as usize, &new_dentry);
        buf.mark_dirty();
        buf.release()?;
        state.attr_of(ino)
    }

    fn listxattr(&self, ino: u64) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let attr = state.attr_of(ino)?;
        if attr.kind == FileKind::File {
            Ok(vec![BANK_NUMBER_XATTR.to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    fn getxattr(&self, ino: u64, name: &str) -> Result<Vec<u8>> {
        if name != BANK_NUMBER_XATTR {
            return Err(Error::NotFound);
        }
        let mut state = self.state.lock().unwrap();
        let (block, slot) = state.inodes.location_of(ino)?;
        let buf = state.io.read(block as u64)?;
        let dentry = DentryTable::read_slot(buf.data(), slot as usize);
        buf.release()?;
        dentry.file_attrs().ok_or(Error::IsADirectory)?;
        Ok(dentry.id.to_string().into_bytes())
    }

    fn setxattr(&self, ino: u64, name: &str, value: &[u8]) -> Result<()> {
        if name != BANK_NUMBER_XATTR {
            return Err(Error::NotFound);
        }
        if value.len() > BANK_NUMBER_LEN_MAX {
            return Err(Error::Range);
        }
        let text = std::str::from_utf8(value).map_err(|_| Error::InvalidArgument)?;
        let bank: u64 = text.trim().parse().map_err(|_| Error::InvalidArgument)?;
        if bank >= MAX_FILES_PER_DIR as u64 {
            return Err(Error::Range);
        }
        let mut state = self.state.lock().unwrap();
        let (block, slot) = state.inodes.location_of(ino)?;
        let mut buf = state.io.read(block as u64)?;
        let mut dentry = DentryTable::read_slot(buf.data(), slot as usize);
        dentry.id = bank as u8;
        DentryTable::write_slot(buf.data_mut(), slot as usize, &dentry);
        buf.mark_dirty();
        buf.release()
    }
}
