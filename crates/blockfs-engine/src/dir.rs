//! Directory contents: an ordered (name, inode) entry list serialized into
//! the directory's first direct block.
//!
//! Stores always rewrite the whole block, zero-padded, so a shorter list can
//! never leave stale entries behind. A list whose encoding exceeds one block
//! is rejected; entries never span blocks.

use blockfs_disk::{DirEntry, Inode, BLOCK_SIZE};

use crate::device::BlockDevice;
use crate::error::FsError;

pub fn load(dev: &mut BlockDevice, dir_inode: &Inode) -> Result<Vec<DirEntry>, FsError> {
    let block = dir_inode.direct_blocks[0];
    if block == 0 {
        return Err(FsError::DirectoryEmpty);
    }
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(block, &mut buf)?;
    blockfs_disk::decode(&buf).map_err(|_| FsError::CorruptDirectory)
}

pub fn store(
    dev: &mut BlockDevice,
    dir_inode: &Inode,
    entries: &[DirEntry],
) -> Result<(), FsError> {
    let block = dir_inode.direct_blocks[0];
    if block == 0 {
        return Err(FsError::DirectoryEmpty);
    }
    let mut buf = [0u8; BLOCK_SIZE];
    blockfs_disk::encode(&entries, &mut buf).map_err(|_| FsError::DirectoryFull)?;
    dev.write_block(block, &buf)
}

pub fn lookup(dev: &mut BlockDevice, dir_inode: &Inode, name: &str) -> Result<u32, FsError> {
    let entries = load(dev, dir_inode)?;
    entries
        .iter()
        .find(|e| e.name == name)
        .map(|e| e.inode)
        .ok_or_else(|| FsError::NotFound(name.to_string()))
}

pub fn add(
    dev: &mut BlockDevice,
    dir_inode: &Inode,
    name: &str,
    inode: u32,
) -> Result<(), FsError> {
    let mut entries = load(dev, dir_inode)?;
    if entries.iter().any(|e| e.name == name) {
        return Err(FsError::AlreadyExists(name.to_string()));
    }
    entries.push(DirEntry::new(name, inode));
    store(dev, dir_inode, &entries)
}

/// Removes the first entry named `name` and returns it.
pub fn remove(
    dev: &mut BlockDevice,
    dir_inode: &Inode,
    name: &str,
) -> Result<DirEntry, FsError> {
    let mut entries = load(dev, dir_inode)?;
    let pos = entries
        .iter()
        .position(|e| e.name == name)
        .ok_or_else(|| FsError::NotFound(name.to_string()))?;
    let entry = entries.remove(pos);
    store(dev, dir_inode, &entries)?;
    Ok(entry)
}
