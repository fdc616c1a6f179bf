//! Thin block-aligned wrapper over the host image file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use blockfs_disk::BLOCK_SIZE;

use crate::error::FsError;

/// Pass-through block device over a host file. All offsets are absolute;
/// there is no caching layer.
pub struct BlockDevice {
    file: File,
}

impl BlockDevice {
    /// Opens an existing image, read-only unless `writable`.
    pub fn open(path: &Path, writable: bool) -> Result<Self, FsError> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        Ok(Self { file })
    }

    /// Creates (or truncates) the image file at `path`.
    pub fn create(path: &Path) -> Result<Self, FsError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), FsError> {
        self.file
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `data` at the start of `block`, zero-padding the tail of the
    /// block so no stale bytes survive a shorter rewrite.
    pub fn write_block(&mut self, block: u32, data: &[u8]) -> Result<(), FsError> {
        debug_assert!(data.len() <= BLOCK_SIZE);
        let mut padded = [0u8; BLOCK_SIZE];
        padded[..data.len()].copy_from_slice(data);
        self.file
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(&padded)?;
        Ok(())
    }

    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), FsError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FsError> {
        self.file.flush()?;
        Ok(())
    }

    pub fn set_len(&mut self, len: u64) -> Result<(), FsError> {
        self.file.set_len(len)?;
        Ok(())
    }
}
