//! Read/write driver for the on-disk filesystem used by E-mu EIII/EIV
//! samplers: a 512-byte-block volume with a FAT-style cluster chain and a
//! two-level directory (a fixed root area, plus up to seven content blocks
//! per root-level directory).
//!
//! Mount with [`FsFacade::mount`], passing the [`Variant`] the volume's
//! mount name implies (`emu3` or `emu4`); everything else is reached
//! through the [`emu3fs_api::FileSystem`] trait it implements.

mod bitmap;
mod block_io;
mod cluster;
mod dentry;
mod dir;
mod file;
mod facade;
mod inode;
mod superblock;

pub use block_io::BLOCK_SIZE;
pub use facade::FsFacade;
pub use superblock::{Geometry, Variant};

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use emu3fs_api::{FileSystem, RenameFlags};

    use super::*;

    /// An in-memory [`emu3fs_ds::DataStorage`] so the test suite never
    /// touches a real file.
    pub struct MemStorage {
        data: Mutex<Vec<u8>>,
    }

    impl MemStorage {
        pub fn new(size: usize) -> Self {
            Self { data: Mutex::new(vec![0u8; size]) }
        }
    }

    impl emu3fs_ds::DataStorage for MemStorage {
        fn read(&self, offset: u64, buffer: &mut [u8]) -> emu3fs_ds::Result<()> {
            let data = self.data.lock().unwrap();
            let start = offset as usize;
            buffer.copy_from_slice(&data[start..start + buffer.len()]);
            Ok(())
        }

        fn write(&self, offset: u64, buffer: &[u8]) -> emu3fs_ds::Result<()> {
            let mut data = self.data.lock().unwrap();
            let start = offset as usize;
            data[start..start + buffer.len()].copy_from_slice(buffer);
            Ok(())
        }

        fn len(&self) -> emu3fs_ds::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }
    }

    const CLUSTER_EXP: u8 = 1; // blocks_per_cluster = (1 << (15 + 1)) / 512 = 128
    const BLOCKS_PER_CLUSTER: u32 = 128;
    const CLUSTER_COUNT: u32 = 16;

    /// Builds a fresh, empty volume image matching the geometry the test
    /// superblock below describes: root at block 1 (4 blocks), dir-content
    /// region at block 5 (16 blocks), cluster list at block 21 (1 block),
    /// data area starting at block 22.
    fn format_volume() -> MemStorage {
        const ROOT_START: u32 = 1;
        const ROOT_LEN: u32 = 4;
        const DIR_CONTENT_START: u32 = 5;
        const DIR_CONTENT_LEN: u32 = 16;
        const CLUSTER_LIST_START: u32 = 21;
        const CLUSTER_LIST_LEN: u32 = 1;
        const DATA_START: u32 = 22;
        const TOTAL_BLOCKS: u32 = DATA_START + CLUSTER_COUNT * BLOCKS_PER_CLUSTER;

        let storage = MemStorage::new(TOTAL_BLOCKS as usize * BLOCK_SIZE);
        let mut block0 = [0u8; BLOCK_SIZE];
        block0[0..4].copy_from_slice(b"EMU3");
        block0[4..8].copy_from_slice(&TOTAL_BLOCKS.to_le_bytes());
        block0[8..12].copy_from_slice(&ROOT_START.to_le_bytes());
        block0[12..16].copy_from_slice(&ROOT_LEN.to_le_bytes());
        block0[16..20].copy_from_slice(&DIR_CONTENT_START.to_le_bytes());
        block0[20..24].copy_from_slice(&DIR_CONTENT_LEN.to_le_bytes());
        block0[24..28].copy_from_slice(&CLUSTER_LIST_START.to_le_bytes());
        block0[28..32].copy_from_slice(&CLUSTER_LIST_LEN.to_le_bytes());
        block0[32..36].copy_from_slice(&DATA_START.to_le_bytes());
        block0[36..40].copy_from_slice(&CLUSTER_COUNT.to_le_bytes());
        block0[0x28] = CLUSTER_EXP;
        storage.write(0, &block0).unwrap();
        storage
    }

    fn mount(storage: MemStorage) -> FsFacade<MemStorage> {
        FsFacade::mount(storage, Variant::V4).unwrap()
    }

    #[test]
    fn mounts_empty_volume_and_reports_statfs() {
        let fs = mount(format_volume());
        let stat = fs.statfs().unwrap();
        assert_eq!(stat.block_size, BLOCK_SIZE as u32);
        assert_eq!(stat.files, 0);
        assert!(stat.blocks_free > 0);
    }

    #[test]
    fn create_write_read_round_trips() {
        let fs = mount(format_volume());
        let attr = fs.create(emu3fs_api::ROOT_INO, "TEST.SND").unwrap();
        let payload = b"hello sampler";
        let written = fs.write(attr.ino, 0, payload).unwrap();
        assert_eq!(written, payload.len());

        let mut buf = [0u8; 32];
        let read = fs.read(attr.ino, 0, &mut buf).unwrap();
        assert_eq!(&buf[..read], payload);

        let refreshed = fs.getattr(attr.ino).unwrap();
        assert_eq!(refreshed.size, payload.len() as u64);
    }

    #[test]
    fn write_spanning_multiple_clusters_round_trips() {
        let fs = mount(format_volume());
        let attr = fs.create(emu3fs_api::ROOT_INO, "BIG.SND").unwrap();
        let cluster_bytes = BLOCKS_PER_CLUSTER as usize * BLOCK_SIZE;
        let payload = vec![0xAB; cluster_bytes + 17];
        fs.write(attr.ino, 0, &payload).unwrap();

        let mut buf = vec![0u8; payload.len()];
        let read = fs.read(attr.ino, 0, &mut buf).unwrap();
        assert_eq!(read, payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn unlink_then_lookup_fails() {
        let fs = mount(format_volume());
        fs.create(emu3fs_api::ROOT_INO, "GONE.SND").unwrap();
        fs.unlink(emu3fs_api::ROOT_INO, "GONE.SND").unwrap();
        assert!(matches!(
            fs.lookup(emu3fs_api::ROOT_INO, "GONE.SND"),
            Err(emu3fs_api::Error::NotFound)
        ));
    }

    #[test]
    fn create_reuses_a_deleted_slot() {
        let fs = mount(format_volume());
        fs.create(emu3fs_api::ROOT_INO, "FIRST.SND").unwrap();
        fs.unlink(emu3fs_api::ROOT_INO, "FIRST.SND").unwrap();
        let second = fs.create(emu3fs_api::ROOT_INO, "SECOND.SND").unwrap();
        assert_eq!(fs.getattr(second.ino).unwrap().size, 0);
    }

    #[test]
    fn mkdir_then_create_inside_and_rmdir() {
        let fs = mount(format_volume());
        let dir = fs.mkdir(emu3fs_api::ROOT_INO, "BANK").unwrap();
        assert_eq!(dir.kind, emu3fs_api::FileKind::Directory);

        let file = fs.create(dir.ino, "PATCH.SND").unwrap();
        fs.write(file.ino, 0, b"x").unwrap();

        assert!(matches!(
            fs.rmdir(emu3fs_api::ROOT_INO, "BANK"),
            Err(emu3fs_api::Error::DirectoryNotEmpty)
        ));

        fs.unlink(dir.ino, "PATCH.SND").unwrap();
        fs.rmdir(emu3fs_api::ROOT_INO, "BANK").unwrap();
        assert!(matches!(
            fs.lookup(emu3fs_api::ROOT_INO, "BANK"),
            Err(emu3fs_api::Error::NotFound)
        ));
    }

    #[test]
    fn rename_within_same_directory() {
        let fs = mount(format_volume());
        let attr = fs.create(emu3fs_api::ROOT_INO, "OLD.SND").unwrap();
        fs.rename(emu3fs_api::ROOT_INO, "OLD.SND", emu3fs_api::ROOT_INO, "NEW.SND", RenameFlags::empty())
            .unwrap();
        let moved = fs.lookup(emu3fs_api::ROOT_INO, "NEW.SND").unwrap();
        assert_eq!(moved.ino, attr.ino);
        assert!(matches!(
            fs.lookup(emu3fs_api::ROOT_INO, "OLD.SND"),
            Err(emu3fs_api::Error::NotFound)
        ));
    }

    #[test]
    fn bank_number_xattr_round_trips() {
        let fs = mount(format_volume());
        let attr = fs.create(emu3fs_api::ROOT_INO, "P.SND").unwrap();
        fs.setxattr(attr.ino, emu3fs_api::BANK_NUMBER_XATTR, b"42").unwrap();
        let value = fs.getxattr(attr.ino, emu3fs_api::BANK_NUMBER_XATTR).unwrap();
        assert_eq!(value, b"42");
    }

    #[test]
    fn bank_number_xattr_rejects_out_of_range() {
        let fs = mount(format_volume());
        let attr = fs.create(emu3fs_api::ROOT_INO, "P.SND").unwrap();
        assert!(matches!(
            fs.setxattr(attr.ino, emu3fs_api::BANK_NUMBER_XATTR, b"999"),
            Err(emu3fs_api::Error::Range)
        ));
    }
}
