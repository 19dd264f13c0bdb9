//! Host runtime boundary
//!
//! The virtual filesystem never touches real files or the network itself; it
//! calls through the [`HostRuntime`] trait. In a sandboxed deployment the
//! implementation bridges to the host environment (native FS handles, HTTP
//! range requests); for native builds and tests [`NativeRuntime`] serves
//! files from the local filesystem.

mod native;

pub use native::NativeRuntime;

/// Failure kinds a host runtime call may report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The runtime has no file registered under the given id
    UnknownFile,
    /// Read/write/open/metadata failure
    Io(String),
    /// Non-2xx response or missing range support when required
    Http { code: u16, message: String },
    /// The operation is not available for this source
    NotSupported(String),
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::UnknownFile => write!(f, "unknown file"),
            HostError::Io(msg) => write!(f, "IO error: {msg}"),
            HostError::Http { code, message } => write!(f, "HTTP error {code}: {message}"),
            HostError::NotSupported(msg) => write!(f, "not supported: {msg}"),
        }
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Result of opening a file through the runtime.
///
/// A source that cannot serve range reads (e.g. an HTTP endpoint without
/// range support) may hand the entire content back inline; the caller then
/// promotes the file to an in-memory buffer.
#[derive(Debug)]
pub struct OpenedFile {
    /// Authoritative size at open time
    pub file_size: u64,
    /// Full contents, if the source forced a full copy
    pub inline_buffer: Option<Vec<u8>>,
}

/// Capability set of the host environment.
///
/// Every call may suspend the calling thread; implementations keep any
/// per-thread scratch state internal (an explicit per-thread context rather
/// than free-function thread locals).
pub trait HostRuntime: Send + Sync {
    /// Open a file for the given registered id. `data_url` names the backing
    /// source (a path for native files, a URL for HTTP sources).
    fn open(&self, file_id: u32, data_url: &str) -> HostResult<OpenedFile>;
    /// Close the runtime-side state for a file id. Never fails.
    fn close(&self, file_id: u32);
    /// Flush runtime-side buffers for the file.
    fn sync(&self, file_id: u32) -> HostResult<()>;
    /// Resize the file. Growing zero-extends.
    fn truncate(&self, file_id: u32, new_size: u64) -> HostResult<()>;
    /// Last modification time in seconds since the epoch.
    fn last_modified(&self, file_id: u32) -> HostResult<i64>;
    /// Positional read; short reads at EOF return the remaining byte count.
    fn read(&self, file_id: u32, buf: &mut [u8], offset: u64) -> HostResult<usize>;
    /// Positional write.
    fn write(&self, file_id: u32, buf: &[u8], offset: u64) -> HostResult<usize>;

    fn dir_exists(&self, path: &str) -> bool;
    fn dir_create(&self, path: &str) -> HostResult<()>;
    fn dir_remove(&self, path: &str) -> HostResult<()>;
    /// Invoke `callback(name, is_dir)` per entry; returns false when listing
    /// is not supported for the path.
    fn list_files(&self, path: &str, callback: &mut dyn FnMut(&str, bool)) -> bool;
    /// Expand a glob pattern against the host namespace.
    fn glob(&self, pattern: &str) -> HostResult<Vec<String>>;
    fn file_move(&self, from: &str, to: &str) -> HostResult<()>;
    fn file_exists(&self, path: &str) -> bool;
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Io(err.to_string())
    }
}
