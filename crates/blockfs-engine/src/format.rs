//! Image formatter: lays down an empty filesystem in a fresh host file.

use std::path::Path;

use blockfs_disk::{Inode, SuperBlock, BLOCK_SIZE};
use log::info;

use crate::device::BlockDevice;
use crate::dir;
use crate::error::FsError;
use crate::inode::write_inode;
use crate::unix_now;

/// Creates (or truncates) `path` and writes an empty `size_mb` megabyte
/// filesystem into it: superblock, bitmaps, inode table and the root
/// directory. The caller guarantees no other user of the image.
pub fn format(path: &Path, size_mb: u64) -> Result<SuperBlock, FsError> {
    let total_bytes = size_mb * 1024 * 1024;
    let total_blocks = (total_bytes / BLOCK_SIZE as u64) as u32;
    let sb = SuperBlock::for_image(total_blocks);

    if total_blocks <= sb.data_start() {
        return Err(FsError::InvalidImage(format!(
            "{size_mb} MB leaves no room for data blocks"
        )));
    }
    if total_blocks - sb.data_start() > BLOCK_SIZE as u32 {
        return Err(FsError::InvalidImage(format!(
            "{size_mb} MB exceeds what one bitmap block can address"
        )));
    }

    let mut dev = BlockDevice::create(path)?;
    // set_len zero-fills, which already gives us an empty inode table and
    // cleared bitmaps.
    dev.set_len(total_bytes)?;

    // 1. Superblock
    let mut block = [0u8; BLOCK_SIZE];
    blockfs_disk::encode(&sb, &mut block)
        .map_err(|e| FsError::InvalidImage(e.to_string()))?;
    dev.write_block(0, &block)?;

    // 2. Inode bitmap: slot 0 (root) used
    dev.write_at(sb.inode_bitmap_start as u64 * BLOCK_SIZE as u64, &[1])?;

    // 3. Root inode, owning the first data block
    let root_block = sb.data_start();
    let root = Inode::new_directory(unix_now(), root_block);
    write_inode(&mut dev, &sb, sb.root_dir_inode, &root)?;

    // 4. Data-block bitmap: bit 0 (the root directory block) used
    dev.write_at(sb.free_space_map_start as u64 * BLOCK_SIZE as u64, &[1])?;

    // 5. Empty entry list in the root directory block
    dir::store(&mut dev, &root, &[])?;

    dev.flush()?;
    info!(
        "formatted {} with {} blocks of {} bytes",
        path.display(),
        total_blocks,
        BLOCK_SIZE
    );
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{Bitmap, BitmapKind};
    use crate::inode::read_inode;
    use blockfs_disk::{MAGIC, TOTAL_INODES};

    #[test]
    fn fresh_image_has_the_published_geometry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.img");
        let sb = format(&path, 10).unwrap();

        assert_eq!(sb.magic, MAGIC);
        assert_eq!(sb.block_size as usize, BLOCK_SIZE);
        assert_eq!(sb.total_blocks, 2560);
        assert_eq!(sb.total_inodes, TOTAL_INODES);
        assert_eq!(sb.root_dir_inode, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10 * 1024 * 1024);

        // The stored superblock round-trips.
        let mut dev = BlockDevice::open(&path, false).unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut block).unwrap();
        assert_eq!(blockfs_disk::decode::<SuperBlock>(&block).unwrap(), sb);
    }

    #[test]
    fn root_is_an_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.img");
        let sb = format(&path, 10).unwrap();

        let mut dev = BlockDevice::open(&path, true).unwrap();
        let root = read_inode(&mut dev, &sb, 0).unwrap();
        assert!(root.is_directory);
        assert_eq!(root.direct_blocks[0], sb.data_start());
        assert!(dir::load(&mut dev, &root).unwrap().is_empty());
    }

    #[test]
    fn only_the_root_resources_are_marked_used() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.img");
        let sb = format(&path, 10).unwrap();

        let mut dev = BlockDevice::open(&path, true).unwrap();
        let inodes = Bitmap::load(&mut dev, &sb, BitmapKind::Inode).unwrap();
        let blocks = Bitmap::load(&mut dev, &sb, BitmapKind::Block).unwrap();
        assert_eq!(inodes.count_used(), 1);
        assert!(inodes.is_used(0));
        assert_eq!(blocks.count_used(), 1);
        assert!(blocks.is_used(0));
    }

    #[test]
    fn reformat_wipes_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.img");
        let sb = format(&path, 10).unwrap();
        {
            let mut dev = BlockDevice::open(&path, true).unwrap();
            crate::alloc::create_file(&mut dev, &sb, 0, "junk", b"junk").unwrap();
        }
        let sb = format(&path, 10).unwrap();
        let mut dev = BlockDevice::open(&path, true).unwrap();
        let root = read_inode(&mut dev, &sb, 0).unwrap();
        assert!(dir::load(&mut dev, &root).unwrap().is_empty());
        assert_eq!(read_inode(&mut dev, &sb, 1).unwrap(), Inode::default());
    }

    #[test]
    fn undersized_and_oversized_images_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.img");
        assert!(matches!(format(&path, 0), Err(FsError::InvalidImage(_))));
        assert!(matches!(format(&path, 64), Err(FsError::InvalidImage(_))));
    }
}
