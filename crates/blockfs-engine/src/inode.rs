//! Fixed-slot inode store.
//!
//! Slot `i` lives at `inode_table_start * BLOCK_SIZE + i * INODE_SIZE`. A
//! record is encoded into a zeroed 256-byte slot, so freeing a slot and
//! writing a default inode are the same operation.

use blockfs_disk::{Inode, SuperBlock, BLOCK_SIZE, INODE_SIZE};

use crate::device::BlockDevice;
use crate::error::FsError;

fn slot_offset(sb: &SuperBlock, index: u32) -> u64 {
    sb.inode_table_start as u64 * BLOCK_SIZE as u64 + index as u64 * INODE_SIZE as u64
}

pub fn read_inode(dev: &mut BlockDevice, sb: &SuperBlock, index: u32) -> Result<Inode, FsError> {
    if index >= sb.total_inodes {
        return Err(FsError::InvalidImage(format!(
            "inode index {index} out of range"
        )));
    }
    let slot = dev.read_at(slot_offset(sb, index), INODE_SIZE)?;
    blockfs_disk::decode(&slot)
        .map_err(|e| FsError::InvalidImage(format!("inode slot {index}: {e}")))
}

pub fn write_inode(
    dev: &mut BlockDevice,
    sb: &SuperBlock,
    index: u32,
    inode: &Inode,
) -> Result<(), FsError> {
    if index >= sb.total_inodes {
        return Err(FsError::InvalidImage(format!(
            "inode index {index} out of range"
        )));
    }
    let mut slot = [0u8; INODE_SIZE];
    blockfs_disk::encode(inode, &mut slot)
        .map_err(|e| FsError::InvalidImage(format!("inode slot {index}: {e}")))?;
    dev.write_at(slot_offset(sb, index), &slot)
}

/// Zeroes the slot so it decodes back to the default inode.
pub fn free_inode(dev: &mut BlockDevice, sb: &SuperBlock, index: u32) -> Result<(), FsError> {
    write_inode(dev, sb, index, &Inode::default())
}
