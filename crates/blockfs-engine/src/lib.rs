//! Filesystem engine over a single host-file image.
//!
//! The image holds a superblock, an inode bitmap, a fixed inode table, a
//! data-block bitmap and data blocks. A [`Filesystem`] owns the image path,
//! the decoded superblock and the gate: one process-wide mutex whose holder
//! may touch the image. Workers interact through per-worker [`Session`]s,
//! which carry a cwd and an open-file table and dispatch command lines.

pub mod alloc;
pub mod bitmap;
pub mod device;
pub mod dir;
pub mod error;
pub mod file;
pub mod format;
pub mod inode;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use blockfs_disk::{SuperBlock, BLOCK_SIZE, MAGIC};
use log::info;

use device::BlockDevice;

pub use error::FsError;
pub use file::{OpenFile, OpenMode};
pub use session::Session;

/// Seconds since the Unix epoch, for inode timestamps.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A mounted blockfs image.
pub struct Filesystem {
    path: PathBuf,
    superblock: SuperBlock,
    gate: Mutex<BlockDevice>,
}

impl Filesystem {
    /// Opens the image at `path` and verifies its superblock.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self, FsError> {
        let path = path.as_ref().to_path_buf();
        let mut dev = BlockDevice::open(&path, true)?;

        let mut block = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut block)?;
        let superblock: SuperBlock =
            blockfs_disk::decode(&block).map_err(|e| FsError::InvalidImage(e.to_string()))?;
        if superblock.magic != MAGIC {
            return Err(FsError::InvalidImage(format!(
                "bad magic {:#010x}",
                superblock.magic
            )));
        }
        if superblock.block_size as usize != BLOCK_SIZE {
            return Err(FsError::InvalidImage(format!(
                "unsupported block size {}",
                superblock.block_size
            )));
        }

        info!(
            "mounted {}: {} blocks, {} inodes",
            path.display(),
            superblock.total_blocks,
            superblock.total_inodes
        );
        Ok(Self {
            path,
            superblock,
            gate: Mutex::new(dev),
        })
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the gate, yielding the shared device. Held for the entirety
    /// of any command body that touches the image.
    pub fn lock(&self) -> MutexGuard<'_, BlockDevice> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a worker session: cwd at the root directory, empty open-file
    /// table.
    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }
}
