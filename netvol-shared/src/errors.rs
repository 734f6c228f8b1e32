//! Error types used across netvol.

use thiserror::Error;

/// Result type for netvol operations.
pub type NetvolResult<T> = Result<T, NetvolError>;

#[derive(Debug, Error)]
pub enum NetvolError {
    /// Stat, create or remove failure on the local mountpoint tree.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// An expected mountpoint (or backend object) is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path is occupied by something that is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(String),

    /// Any failure reported by the storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NetvolError {
    /// Short machine-friendly name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NetvolError::Filesystem(_) => "filesystem",
            NetvolError::NotFound(_) => "not_found",
            NetvolError::NotADirectory(_) => "not_a_directory",
            NetvolError::Backend(_) => "backend",
            NetvolError::Config(_) => "config",
            NetvolError::InvalidArgument(_) => "invalid_argument",
            NetvolError::Internal(_) => "internal",
        }
    }
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for NetvolError {
    fn from(err: std::io::Error) -> Self {
        NetvolError::Filesystem(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for NetvolError {
    fn from(err: serde_json::Error) -> Self {
        NetvolError::Config(format!("JSON error: {}", err))
    }
}
