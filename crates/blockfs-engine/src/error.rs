use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("directory has no data block")]
    DirectoryEmpty,

    #[error("failed to read directory entries")]
    CorruptDirectory,

    #[error("directory is full")]
    DirectoryFull,

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("{0} is a directory")]
    IsADirectory(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("no free inodes available")]
    NoInodes,

    #[error("not enough free data blocks available")]
    NoSpace,

    #[error("file too large (max {} direct blocks)", blockfs_disk::INODE_DIRECT_BLOCKS)]
    FileTooLarge,

    #[error("invalid range")]
    InvalidRange,

    #[error("{0} is not open")]
    NotOpen(String),

    #[error("invalid open mode: {0}")]
    BadMode(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("file data is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
