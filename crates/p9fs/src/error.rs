//! Server-side error type and its mapping onto the fixed 9P2000.u `ename` set.
//!
//! Unlike 9P2000.L, which reports failures as a numeric `errno` in `Rlerror`,
//! plain 9P2000.u reports them as a short, stable string in `Rerror`. The set
//! of strings this server can emit is fixed (see [`Error::ename`]) so that
//! clients can pattern-match on them.

use thiserror::Error;

/// Everything that can go wrong while servicing a 9P request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("file exists")]
    AlreadyExists,

    #[error("no space left")]
    NoSpace,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument")]
    InvalidArgument,

    #[error("authentication not required")]
    AuthNotRequired,

    #[error("unknown message type")]
    UnknownMessageType,

    #[error("protocol error")]
    Protocol,

    #[error("fid unknown or out of range")]
    UnknownFid,

    #[error("fid in use")]
    FidInUse,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("walk limit exceeded")]
    WalkLimitExceeded,

    #[error("name too long")]
    NameTooLong,

    #[error("not supported")]
    NotSupported,

    #[error("msize exceeded")]
    MsizeExceeded,
}

impl Error {
    /// The exact string placed in `Rerror.ename`.
    ///
    /// This set is stable: it is the full client-visible vocabulary of this
    /// server and must not grow or shrink without breaking compatibility.
    pub fn ename(&self) -> &'static str {
        match self {
            Error::NotFound => "file not found",
            Error::PermissionDenied => "permission denied",
            Error::AlreadyExists => "file exists",
            Error::NoSpace => "no space left",
            Error::Io(_) => "io error",
            Error::InvalidArgument => "invalid argument",
            Error::AuthNotRequired => "authentication not required",
            Error::UnknownMessageType => "unknown message type",
            Error::Protocol => "protocol error",
            Error::UnknownFid => "fid unknown or out of range",
            Error::FidInUse => "fid in use",
            Error::NotADirectory => "not a directory",
            Error::IsADirectory => "is a directory",
            Error::WalkLimitExceeded => "walk limit exceeded",
            Error::NameTooLong => "name too long",
            Error::NotSupported => "not supported",
            Error::MsizeExceeded => "msize exceeded",
        }
    }
}

impl From<fatfs::Error<std::io::Error>> for Error {
    fn from(e: fatfs::Error<std::io::Error>) -> Self {
        match e {
            fatfs::Error::NotFound => Error::NotFound,
            fatfs::Error::AlreadyExists => Error::AlreadyExists,
            fatfs::Error::NotEnoughSpace => Error::NoSpace,
            fatfs::Error::DirectoryNotEmpty => Error::InvalidArgument,
            fatfs::Error::InvalidInput | fatfs::Error::CorruptedFileSystem => {
                Error::InvalidArgument
            }
            fatfs::Error::Io(io) => Error::Io(io),
            _ => Error::Io(std::io::Error::other("unhandled fatfs error")),
        }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
