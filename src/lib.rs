//! hostdb: virtual filesystem and file-page buffering core
//!
//! The subsystem that turns heterogeneous data sources (host-native files,
//! in-memory buffers, remote HTTP URLs) into a single coherent, seekable,
//! cacheable file interface for an embedded analytical SQL engine running in
//! a sandboxed host. The engine itself is an external collaborator reached
//! through the traits in [`engine`].

pub mod buffer;
pub mod db;
pub mod engine;
pub mod runtime;
pub mod stats;
pub mod vfs;

// Re-export main types
pub use buffer::{BufferedFileSystem, FileConfig, FilePageBuffer};
pub use db::{Connection, Database, DatabaseConfig};
pub use stats::{FileStatisticsCollector, FileStatisticsRegistry};
pub use vfs::{DataBuffer, DataProtocol, FileHandle, OpenFlags, VirtualFileSystem};

/// Core error type
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("key error: {0}")]
    KeyError(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("HTTP error {code}: {message}")]
    Http { code: u16, message: String },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("file already registered: {0}")]
    AlreadyRegistered(String),

    #[error("resource is busy")]
    Busy,

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Io(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for DbError {
    fn from(err: arrow::error::ArrowError) -> Self {
        DbError::Execution(err.to_string())
    }
}

impl From<runtime::HostError> for DbError {
    fn from(err: runtime::HostError) -> Self {
        match err {
            runtime::HostError::UnknownFile => DbError::Invalid("unknown file".to_string()),
            runtime::HostError::Io(msg) => DbError::Io(msg),
            runtime::HostError::Http { code, message } => DbError::Http { code, message },
            runtime::HostError::NotSupported(msg) => DbError::NotSupported(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
