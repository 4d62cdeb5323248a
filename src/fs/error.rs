use core::fmt;

/// Filesystem error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NameTooLong,
    InvalidInode,
    NotExecutable,
    ReadOnly,
    CorruptImage,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "No such file or directory"),
            FsError::NameTooLong => write!(f, "File name too long"),
            FsError::InvalidInode => write!(f, "Invalid inode"),
            FsError::NotExecutable => write!(f, "Exec format error"),
            FsError::ReadOnly => write!(f, "Read-only file system"),
            FsError::CorruptImage => write!(f, "Corrupt file system image"),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
