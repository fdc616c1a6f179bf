//! Creation and deletion of files and directories.
//!
//! Allocation order: resource checks first (nothing persisted), then content
//! blocks, inode and bitmaps, then the parent directory entry. The entry is
//! the last step; if it fails the bits are cleared and the inode slot zeroed
//! before the error is returned, so the bitmaps never leak a half-created
//! object.

use blockfs_disk::{Inode, SuperBlock, BLOCK_SIZE, INODE_DIRECT_BLOCKS};
use log::warn;

use crate::bitmap::{Bitmap, BitmapKind};
use crate::device::BlockDevice;
use crate::dir;
use crate::error::FsError;
use crate::inode::{free_inode, read_inode, write_inode};
use crate::unix_now;

fn load_parent(dev: &mut BlockDevice, sb: &SuperBlock, cwd: u32) -> Result<Inode, FsError> {
    let parent = read_inode(dev, sb, cwd)?;
    if !parent.is_directory {
        return Err(FsError::NotADirectory(format!("inode {cwd}")));
    }
    Ok(parent)
}

/// Creates `name` under the directory `cwd` with the given initial content.
/// Returns the new file's inode index.
pub fn create_file(
    dev: &mut BlockDevice,
    sb: &SuperBlock,
    cwd: u32,
    name: &str,
    content: &[u8],
) -> Result<u32, FsError> {
    let parent = load_parent(dev, sb, cwd)?;
    let entries = dir::load(dev, &parent)?;
    if entries.iter().any(|e| e.name == name) {
        return Err(FsError::AlreadyExists(name.to_string()));
    }

    let need = Inode::blocks_needed(content.len() as u64);
    if need > INODE_DIRECT_BLOCKS {
        return Err(FsError::FileTooLarge);
    }

    // Pick everything in memory before the first write, so a resource
    // failure leaves the image untouched.
    let mut block_map = Bitmap::load(dev, sb, BitmapKind::Block)?;
    let mut blocks = Vec::with_capacity(need);
    for _ in 0..need {
        let index = block_map.find_first_free().ok_or(FsError::NoSpace)?;
        block_map.set(index, true);
        blocks.push(sb.block_for_index(index));
    }
    let mut inode_map = Bitmap::load(dev, sb, BitmapKind::Inode)?;
    let slot = inode_map.find_first_free().ok_or(FsError::NoInodes)?;
    inode_map.set(slot, true);

    for (chunk, &block) in content.chunks(BLOCK_SIZE).zip(&blocks) {
        dev.write_block(block, chunk)?;
    }

    let now = unix_now();
    let mut inode = Inode::new_file(now);
    inode.file_size = content.len() as u64;
    for (i, &block) in blocks.iter().enumerate() {
        inode.direct_blocks[i] = block;
    }
    write_inode(dev, sb, slot, &inode)?;
    block_map.store(dev, sb)?;
    inode_map.store(dev, sb)?;

    // Allocations are committed; the directory entry is the final step.
    match dir::add(dev, &parent, name, slot) {
        Ok(()) => Ok(slot),
        Err(e) => {
            warn!("rolling back creation of {name}: {e}");
            rollback(dev, sb, slot, &blocks, &mut inode_map, &mut block_map)?;
            Err(e)
        }
    }
}

/// Creates an empty directory `name` under `cwd`. Returns its inode index.
pub fn create_dir(
    dev: &mut BlockDevice,
    sb: &SuperBlock,
    cwd: u32,
    name: &str,
) -> Result<u32, FsError> {
    let parent = load_parent(dev, sb, cwd)?;
    let entries = dir::load(dev, &parent)?;
    if entries.iter().any(|e| e.name == name) {
        return Err(FsError::AlreadyExists(name.to_string()));
    }

    let mut inode_map = Bitmap::load(dev, sb, BitmapKind::Inode)?;
    let slot = inode_map.find_first_free().ok_or(FsError::NoInodes)?;
    inode_map.set(slot, true);
    let mut block_map = Bitmap::load(dev, sb, BitmapKind::Block)?;
    let index = block_map.find_first_free().ok_or(FsError::NoSpace)?;
    block_map.set(index, true);
    let block = sb.block_for_index(index);

    let inode = Inode::new_directory(unix_now(), block);
    write_inode(dev, sb, slot, &inode)?;
    dir::store(dev, &inode, &[])?;
    inode_map.store(dev, sb)?;
    block_map.store(dev, sb)?;

    match dir::add(dev, &parent, name, slot) {
        Ok(()) => Ok(slot),
        Err(e) => {
            warn!("rolling back creation of directory {name}: {e}");
            rollback(dev, sb, slot, &[block], &mut inode_map, &mut block_map)?;
            Err(e)
        }
    }
}

/// Deletes the file `name` from `cwd`, releasing its inode and data blocks.
pub fn delete_file(
    dev: &mut BlockDevice,
    sb: &SuperBlock,
    cwd: u32,
    name: &str,
) -> Result<(), FsError> {
    let parent = load_parent(dev, sb, cwd)?;
    let entries = dir::load(dev, &parent)?;
    let entry = entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| FsError::NotFound(name.to_string()))?;
    let inode = read_inode(dev, sb, entry.inode)?;
    if inode.is_directory {
        return Err(FsError::IsADirectory(name.to_string()));
    }

    let slot = entry.inode;
    dir::remove(dev, &parent, name)?;
    free_inode(dev, sb, slot)?;

    let mut inode_map = Bitmap::load(dev, sb, BitmapKind::Inode)?;
    inode_map.set(slot, false);
    inode_map.store(dev, sb)?;

    let mut block_map = Bitmap::load(dev, sb, BitmapKind::Block)?;
    for block in inode.allocated_blocks() {
        block_map.set(sb.index_for_block(block), false);
    }
    block_map.store(dev, sb)?;
    Ok(())
}

fn rollback(
    dev: &mut BlockDevice,
    sb: &SuperBlock,
    slot: u32,
    blocks: &[u32],
    inode_map: &mut Bitmap,
    block_map: &mut Bitmap,
) -> Result<(), FsError> {
    free_inode(dev, sb, slot)?;
    inode_map.set(slot, false);
    inode_map.store(dev, sb)?;
    for &block in blocks {
        block_map.set(sb.index_for_block(block), false);
    }
    block_map.store(dev, sb)?;
    Ok(())
}
