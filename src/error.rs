use thiserror::Error;

/// Failures reported by image operations.
///
/// Each variant is a decision point a front end can act on before it commits
/// a mutation. Corruption of the image itself is not represented here: the
/// engine asserts on it instead.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("No such file or directory")]
    NotFound,

    #[error("File exists")]
    AlreadyExists,

    #[error("Not a directory")]
    NotADirectory,

    #[error("Is a directory")]
    IsADirectory,

    #[error("File name too long")]
    NameTooLong,

    #[error("No space left on device")]
    NoSpace,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Nested symbolic link rejected")]
    SymlinkCycle,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not a usable ext2 image: {0}")]
    BadImage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// POSIX error number for this failure, used as the process exit code.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::NoSpace => libc::ENOSPC,
            FsError::InvalidPath(_) | FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::SymlinkCycle => libc::ELOOP,
            FsError::BadImage(_) | FsError::Config(_) => libc::EXIT_FAILURE,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
