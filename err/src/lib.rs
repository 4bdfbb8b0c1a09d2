//! Error types shared by the emu3fs data-storage, API and driver crates.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("volume signature is not \"EMU3\"")]
    InvalidSignature,
    #[error("superblock geometry is inconsistent")]
    InvalidGeometry,
    #[error("block {0} could not be read")]
    BlockUnreadable(u64),
    #[error("no space left on device")]
    NoSpace,
    #[error("name longer than 16 bytes")]
    NameTooLong,
    #[error("name is empty")]
    NameEmpty,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("file exists")]
    Exists,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("value out of range")]
    Range,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
