//! Error types for bufhub

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("expected at least one buffer handle but got zero")]
    NoBuffers,

    #[error("failed to import slice {index}: {reason}")]
    ImportFailed { index: usize, reason: String },

    #[error("buffer is not ready")]
    NotReady,

    #[error("metadata size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("slice {0} is already locked")]
    AlreadyLocked(usize),

    #[error("access denied: lock is read-only")]
    ReadOnly,

    #[error("producer is gone")]
    PeerGone,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Whether this error means the channel itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io(errno.desc().to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
