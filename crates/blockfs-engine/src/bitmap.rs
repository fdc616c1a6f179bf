//! The inode and data-block bitmaps.
//!
//! Both are byte maps: one byte per slot, 0 free, 1 used. An operation loads
//! the map it needs once, mutates the in-memory copy, and stores it back in a
//! single write while the gate is held.

use blockfs_disk::{SuperBlock, BLOCK_SIZE};

use crate::device::BlockDevice;
use crate::error::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapKind {
    Inode,
    Block,
}

pub struct Bitmap {
    kind: BitmapKind,
    bytes: Vec<u8>,
}

impl Bitmap {
    fn region(kind: BitmapKind, sb: &SuperBlock) -> (u64, usize) {
        let (block, len) = match kind {
            BitmapKind::Inode => (sb.inode_bitmap_start, sb.total_inodes as usize),
            BitmapKind::Block => (sb.free_space_map_start, sb.data_block_count() as usize),
        };
        (block as u64 * BLOCK_SIZE as u64, len)
    }

    pub fn load(dev: &mut BlockDevice, sb: &SuperBlock, kind: BitmapKind) -> Result<Self, FsError> {
        let (offset, len) = Self::region(kind, sb);
        let bytes = dev.read_at(offset, len)?;
        Ok(Self { kind, bytes })
    }

    pub fn store(&self, dev: &mut BlockDevice, sb: &SuperBlock) -> Result<(), FsError> {
        let (offset, _) = Self::region(self.kind, sb);
        dev.write_at(offset, &self.bytes)
    }

    /// Lowest free index, if any.
    pub fn find_first_free(&self) -> Option<u32> {
        self.bytes.iter().position(|&b| b == 0).map(|i| i as u32)
    }

    pub fn is_used(&self, index: u32) -> bool {
        self.bytes.get(index as usize).is_some_and(|&b| b != 0)
    }

    pub fn set(&mut self, index: u32, used: bool) {
        if let Some(byte) = self.bytes.get_mut(index as usize) {
            *byte = used as u8;
        }
    }

    pub fn count_used(&self) -> usize {
        self.bytes.iter().filter(|&&b| b != 0).count()
    }

    pub fn count_free(&self) -> usize {
        self.bytes.len() - self.count_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockfs_disk::TOTAL_INODES;

    fn scratch(sb: &SuperBlock) -> (tempfile::TempDir, BlockDevice) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.img");
        let mut dev = BlockDevice::create(&path).unwrap();
        dev.set_len(sb.total_blocks as u64 * BLOCK_SIZE as u64).unwrap();
        (dir, dev)
    }

    #[test]
    fn fresh_map_is_all_free() {
        let sb = SuperBlock::for_image(64);
        let (_dir, mut dev) = scratch(&sb);
        let map = Bitmap::load(&mut dev, &sb, BitmapKind::Inode).unwrap();
        assert_eq!(map.find_first_free(), Some(0));
        assert_eq!(map.count_free(), TOTAL_INODES as usize);
    }

    #[test]
    fn marks_survive_a_store_and_load() {
        let sb = SuperBlock::for_image(64);
        let (_dir, mut dev) = scratch(&sb);

        let mut map = Bitmap::load(&mut dev, &sb, BitmapKind::Block).unwrap();
        map.set(0, true);
        map.set(3, true);
        map.store(&mut dev, &sb).unwrap();

        let map = Bitmap::load(&mut dev, &sb, BitmapKind::Block).unwrap();
        assert!(map.is_used(0));
        assert!(!map.is_used(1));
        assert!(map.is_used(3));
        assert_eq!(map.find_first_free(), Some(1));
    }

    #[test]
    fn full_map_has_no_free_slot() {
        let sb = SuperBlock::for_image(64);
        let (_dir, mut dev) = scratch(&sb);

        let mut map = Bitmap::load(&mut dev, &sb, BitmapKind::Block).unwrap();
        for i in 0..sb.data_block_count() {
            map.set(i, true);
        }
        assert_eq!(map.find_first_free(), None);
        assert_eq!(map.count_free(), 0);
    }

    #[test]
    fn block_map_covers_only_the_data_area() {
        let sb = SuperBlock::for_image(64);
        let (_dir, mut dev) = scratch(&sb);
        let map = Bitmap::load(&mut dev, &sb, BitmapKind::Block).unwrap();
        assert_eq!(map.count_free() as u32, sb.total_blocks - sb.data_start());
    }
}
