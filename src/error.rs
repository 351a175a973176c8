//! ### Error taxonomy
//!
//! A closed sum of everything that can go wrong while mounting, formatting, or
//! mutating a FAT12 volume.  The `Display` trait prints the long message; callers
//! that need programmatic dispatch should match on the variant.

/// Enumerates FAT12 volume errors.  The `Display` trait will print the long message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no image is mounted")]
    NotMounted,
    #[error("an image is already mounted")]
    AlreadyMounted,
    #[error("image I/O failure")]
    ImageIO,
    #[error("named disk format does not exist")]
    FormatDoesNotExist,
    #[error("file does not exist")]
    FileDoesNotExist,
    #[error("file already exists")]
    FileExists,
    #[error("entry is not a file")]
    NotFile,
    #[error("no free directory entries")]
    NoFreeEntries,
    #[error("no free clusters")]
    NoFreeClusters,
    #[error("invalid name")]
    InvalidName,
    #[error("filesystem structure is corrupt")]
    CorruptFilesystem,
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Error::ImageIO
    }
}
