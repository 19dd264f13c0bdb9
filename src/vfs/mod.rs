//! Virtual filesystem
//!
//! Maps logical file names to data sources of three protocols: in-process
//! buffers, host-native files and remote HTTP URLs. Registered files are
//! reference counted through [`FileHandle`]s; native and HTTP files are
//! closed in the host runtime and unregistered when the last handle goes
//! away, buffer files stay until dropped explicitly.
//!
//! Locking: one non-reentrant registry mutex guards both name and id maps;
//! each file carries its own shared/exclusive lock for protocol switches,
//! size changes and truncation. The lock of a shared file is never acquired
//! while the registry mutex is held: open and re-registration pin the file
//! with a handle and release the registry before locking it, close only
//! try-locks the file. The sole file-lock acquisitions under the registry
//! mutex are on freshly created files nobody else can see yet. This keeps
//! the two orderings free of cycles.

mod data_buffer;
mod glob;
mod readahead;

pub use data_buffer::DataBuffer;
pub use glob::glob_to_regex;
pub use readahead::{ReadAheadBuffer, READAHEAD_MIN};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use ahash::AHashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::runtime::{HostError, HostRuntime};
use crate::stats::{FileStatisticsCollector, FileStatisticsRegistry};
use crate::{DbError, Result};

/// Data source kind of a registered file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataProtocol {
    /// Bytes live in the process
    Buffer = 0,
    /// Opened through the host native filesystem
    Native = 1,
    /// Read via host HTTP range requests
    Http = 2,
}

/// Open options for [`VirtualFileSystem::open_file`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub write: bool,
    /// Truncate to zero after opening
    pub create_new: bool,
}

impl OpenFlags {
    pub fn read() -> Self {
        Self::default()
    }

    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    pub fn create_new() -> Self {
        Self {
            write: true,
            create_new: true,
        }
    }
}

/// Infer the protocol from a URL prefix; `file://` is stripped.
fn infer_data_protocol(url: &str) -> (DataProtocol, &str) {
    if url.starts_with("http://") || url.starts_with("https://") {
        (DataProtocol::Http, url)
    } else if let Some(path) = url.strip_prefix("file://") {
        (DataProtocol::Native, path)
    } else {
        (DataProtocol::Native, url)
    }
}

/// Mutable per-file state, guarded by the file lock
struct FileState {
    protocol: DataProtocol,
    data_fd: Option<u32>,
    file_size: u64,
    /// Present iff the protocol is BUFFER
    buffer: Option<DataBuffer>,
    stats: Option<Arc<FileStatisticsCollector>>,
}

/// One registered file
pub struct VirtualFile {
    file_id: u32,
    file_name: String,
    /// Origin of the data; survives protocol promotion to BUFFER
    data_url: Option<String>,
    /// Live handles; read under the registry mutex
    handle_count: AtomicUsize,
    state: RwLock<FileState>,
}

impl VirtualFile {
    fn new(file_id: u32, file_name: &str, protocol: DataProtocol, data_url: Option<String>) -> Self {
        Self {
            file_id,
            file_name: file_name.to_string(),
            data_url,
            handle_count: AtomicUsize::new(0),
            state: RwLock::new(FileState {
                protocol,
                data_fd: None,
                file_size: 0,
                buffer: None,
                stats: None,
            }),
        }
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn handle_count(&self) -> usize {
        self.handle_count.load(Ordering::Acquire)
    }
}

struct RegistryState {
    files_by_id: AHashMap<u32, Arc<VirtualFile>>,
    files_by_name: AHashMap<String, Arc<VirtualFile>>,
    next_file_id: u32,
    statistics: Option<Arc<FileStatisticsRegistry>>,
}

impl RegistryState {
    fn allocate_file_id(&mut self) -> u32 {
        // Ids may be reused after a drop; skip ones that are still taken
        loop {
            let id = self.next_file_id;
            self.next_file_id = self.next_file_id.wrapping_add(1);
            if !self.files_by_id.contains_key(&id) {
                return id;
            }
        }
    }
}

/// The virtual file registry
pub struct VirtualFileSystem {
    runtime: Arc<dyn HostRuntime>,
    allow_full_http_reads: AtomicBool,
    state: Mutex<RegistryState>,
    /// Per-thread read-ahead windows; walked on invalidation
    readaheads: Mutex<AHashMap<ThreadId, Arc<ReadAheadBuffer>>>,
}

impl VirtualFileSystem {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            allow_full_http_reads: AtomicBool::new(true),
            state: Mutex::new(RegistryState {
                files_by_id: AHashMap::new(),
                files_by_name: AHashMap::new(),
                next_file_id: 0,
                statistics: None,
            }),
            readaheads: Mutex::new(AHashMap::new()),
        })
    }

    pub fn runtime(&self) -> &Arc<dyn HostRuntime> {
        &self.runtime
    }

    pub fn set_allow_full_http_reads(&self, allow: bool) {
        self.allow_full_http_reads.store(allow, Ordering::Release);
    }

    /// Register a file under a URL. Re-registering the same name with the
    /// same URL returns a fresh handle to the existing file.
    pub fn register_file_url(
        self: &Arc<Self>,
        file_name: &str,
        file_url: &str,
        file_size: Option<u64>,
    ) -> Result<FileHandle> {
        let mut registry = self.state.lock();
        if let Some(file) = registry.files_by_name.get(file_name) {
            if file.data_url.as_deref() == Some(file_url)
                || file.data_url.as_deref() == Some(infer_data_protocol(file_url).1)
            {
                return Ok(FileHandle::new(self.clone(), file.clone()));
            }
            return Err(DbError::AlreadyRegistered(file_name.to_string()));
        }

        let (protocol, data_url) = infer_data_protocol(file_url);
        let file_id = registry.allocate_file_id();
        let file = Arc::new(VirtualFile::new(
            file_id,
            file_name,
            protocol,
            Some(data_url.to_string()),
        ));
        file.state.write().file_size = file_size.unwrap_or(0);
        registry.files_by_id.insert(file_id, file.clone());
        registry.files_by_name.insert(file_name.to_string(), file.clone());
        log::debug!("registered file url: {file_name} ({data_url})");
        Ok(FileHandle::new(self.clone(), file))
    }

    /// Register in-memory bytes under a name, replacing any existing content.
    /// A previously NATIVE file has its host handle closed.
    pub fn register_file_buffer(
        self: &Arc<Self>,
        file_name: &str,
        buffer: DataBuffer,
    ) -> Result<FileHandle> {
        // Look up the file under the registry mutex and pin it with a
        // handle; a live handle keeps drops at bay, so the registry mutex
        // can be released before the file lock is taken.
        let handle = {
            let mut registry = self.state.lock();
            match registry.files_by_name.get(file_name) {
                Some(file) => FileHandle::new(self.clone(), file.clone()),
                None => {
                    let file_id = registry.allocate_file_id();
                    let file = Arc::new(VirtualFile::new(
                        file_id,
                        file_name,
                        DataProtocol::Buffer,
                        None,
                    ));
                    {
                        let mut file_state = file.state.write();
                        file_state.file_size = buffer.size() as u64;
                        file_state.buffer = Some(buffer);
                    }
                    registry.files_by_id.insert(file_id, file.clone());
                    registry
                        .files_by_name
                        .insert(file_name.to_string(), file.clone());
                    log::debug!("registered file buffer: {file_name}");
                    return Ok(FileHandle::new(self.clone(), file));
                }
            }
        };

        // Replace the content under the file lock alone
        let was_native = {
            let mut file_state = handle.file.state.write();
            let was_native = file_state.protocol == DataProtocol::Native;
            file_state.file_size = buffer.size() as u64;
            file_state.buffer = Some(buffer);
            file_state.protocol = DataProtocol::Buffer;
            if let Some(stats) = &file_state.stats {
                stats.resize(file_state.file_size);
            }
            was_native
        };
        if was_native {
            self.runtime.close(handle.file.file_id);
        }
        self.invalidate_readaheads(handle.file.file_id);
        Ok(handle)
    }

    /// Open a file by URL, registering it on the fly.
    pub fn open_file(self: &Arc<Self>, url: &str, flags: OpenFlags) -> Result<FileHandle> {
        // The statistics registry is read here as well: it must not be
        // looked up later with the file lock held.
        let (file, handle, stats_registry) = {
            let mut registry = self.state.lock();
            let file = match registry.files_by_name.get(url) {
                Some(file) => file.clone(),
                None => {
                    let (protocol, data_url) = infer_data_protocol(url);
                    let file_id = registry.allocate_file_id();
                    let file = Arc::new(VirtualFile::new(
                        file_id,
                        url,
                        protocol,
                        Some(data_url.to_string()),
                    ));
                    registry.files_by_id.insert(file_id, file.clone());
                    registry.files_by_name.insert(url.to_string(), file.clone());
                    file
                }
            };
            let handle = FileHandle::new(self.clone(), file.clone());
            let stats_registry = registry.statistics.clone();
            (file, handle, stats_registry)
        };

        let mut state = file.state.write();
        match state.protocol {
            DataProtocol::Buffer => {
                if flags.create_new {
                    if let Some(buffer) = state.buffer.as_mut() {
                        buffer.resize(0);
                    }
                    state.file_size = 0;
                }
            }
            DataProtocol::Native if state.data_fd.is_some() => {}
            DataProtocol::Native | DataProtocol::Http => {
                let data_url = file
                    .data_url
                    .clone()
                    .unwrap_or_else(|| file.file_name.clone());
                match self.runtime.open(file.file_id, &data_url) {
                    Ok(opened) => {
                        state.file_size = opened.file_size;
                        // A source without range support hands its content
                        // back fully; promote to BUFFER in place. The data
                        // url stays set.
                        if let Some(bytes) = opened.inline_buffer {
                            state.file_size = bytes.len() as u64;
                            state.protocol = DataProtocol::Buffer;
                            state.buffer = Some(DataBuffer::from_vec(bytes));
                        }
                        if flags.create_new {
                            if let Some(buffer) = state.buffer.as_mut() {
                                buffer.resize(0);
                            } else {
                                self.runtime.truncate(file.file_id, 0)?;
                            }
                            state.file_size = 0;
                        }
                    }
                    Err(err) => {
                        drop(state);
                        let mut registry = self.state.lock();
                        if registry
                            .files_by_name
                            .get(&file.file_name)
                            .map_or(false, |f| Arc::ptr_eq(f, &file))
                        {
                            registry.files_by_name.remove(&file.file_name);
                            registry.files_by_id.remove(&file.file_id);
                        }
                        drop(registry);
                        return Err(DbError::Io(format!(
                            "opening file '{}' failed with error: {err}",
                            file.file_name
                        )));
                    }
                }
            }
        }

        // Attach a statistics collector when one is enabled for this path
        if let Some(stats_registry) = stats_registry {
            if let Some(collector) = stats_registry.find_collector(&file.file_name) {
                collector.resize(state.file_size);
                state.stats = Some(collector);
            }
        }
        drop(state);
        Ok(handle)
    }

    /// Remove a file unless handles are still alive. Unknown names count as
    /// dropped.
    pub fn try_drop_file(&self, file_name: &str) -> bool {
        let mut registry = self.state.lock();
        let Some(file) = registry.files_by_name.get(file_name) else {
            return true;
        };
        if file.handle_count.load(Ordering::Acquire) > 0 {
            return false;
        }
        let file = file.clone();
        registry.files_by_id.remove(&file.file_id);
        registry.files_by_name.remove(file_name);
        true
    }

    /// Remove every file without live handles.
    pub fn drop_dangling_files(&self) {
        let mut registry = self.state.lock();
        let dangling: Vec<Arc<VirtualFile>> = registry
            .files_by_id
            .values()
            .filter(|f| f.handle_count.load(Ordering::Acquire) == 0)
            .cloned()
            .collect();
        for file in dangling {
            registry.files_by_name.remove(&file.file_name);
            registry.files_by_id.remove(&file.file_id);
        }
    }

    /// Bind a prebound host descriptor to a registered file.
    pub fn set_file_descriptor(&self, file_id: u32, fd: u32) -> Result<()> {
        let file = { self.state.lock().files_by_id.get(&file_id).cloned() }
            .ok_or_else(|| DbError::KeyError(format!("invalid file id: {file_id}")))?;
        file.state.write().data_fd = Some(fd);
        Ok(())
    }

    pub fn file_info_by_id(&self, file_id: u32) -> serde_json::Value {
        let file = { self.state.lock().files_by_id.get(&file_id).cloned() };
        match file {
            Some(file) => self.write_file_info(&file),
            None => serde_json::Value::Null,
        }
    }

    pub fn file_info_by_name(&self, file_name: &str) -> serde_json::Value {
        let file = { self.state.lock().files_by_name.get(file_name).cloned() };
        match file {
            Some(file) => self.write_file_info(&file),
            None => {
                // Unknown name: report what the protocol would be
                let (protocol, _) = infer_data_protocol(file_name);
                let mut info = serde_json::Map::new();
                info.insert("fileName".into(), file_name.into());
                info.insert("dataProtocol".into(), (protocol as u8).into());
                serde_json::Value::Object(info)
            }
        }
    }

    fn write_file_info(&self, file: &VirtualFile) -> serde_json::Value {
        let state = file.state.read();
        let mut info = serde_json::Map::new();
        info.insert("fileId".into(), file.file_id.into());
        info.insert("fileName".into(), file.file_name.clone().into());
        info.insert("fileSize".into(), state.file_size.into());
        info.insert("dataProtocol".into(), (state.protocol as u8).into());
        if let Some(url) = &file.data_url {
            info.insert("dataUrl".into(), url.clone().into());
        }
        if state.data_fd.is_some() {
            info.insert("dataNativeFd".into(), serde_json::Value::Null);
        }
        if state.protocol == DataProtocol::Http
            && self.allow_full_http_reads.load(Ordering::Acquire)
        {
            info.insert("allowFullHttpReads".into(), true.into());
        }
        serde_json::Value::Object(info)
    }

    /// Glob over registered names and the host namespace, sorted and deduped.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = glob_to_regex(pattern)?;
        let mut results: Vec<String> = {
            let registry = self.state.lock();
            registry
                .files_by_name
                .keys()
                .filter(|name| regex.is_match(name))
                .cloned()
                .collect()
        };
        match self.runtime.glob(pattern) {
            Ok(paths) => results.extend(paths),
            Err(HostError::NotSupported(_)) => {}
            Err(err) => return Err(err.into()),
        }
        results.sort();
        results.dedup();
        Ok(results)
    }

    pub fn file_exists(&self, path: &str) -> bool {
        if self.state.lock().files_by_name.contains_key(path) {
            return true;
        }
        self.runtime.file_exists(path)
    }

    pub fn dir_exists(&self, path: &str) -> bool {
        self.runtime.dir_exists(path)
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        Ok(self.runtime.dir_create(path)?)
    }

    pub fn remove_directory(&self, path: &str) -> Result<()> {
        Ok(self.runtime.dir_remove(path)?)
    }

    pub fn list_files(&self, path: &str, callback: &mut dyn FnMut(&str, bool)) -> bool {
        self.runtime.list_files(path, callback)
    }

    pub fn move_file(&self, from: &str, to: &str) -> Result<()> {
        Ok(self.runtime.file_move(from, to)?)
    }

    pub fn configure_statistics(&self, registry: Option<Arc<FileStatisticsRegistry>>) {
        self.state.lock().statistics = registry;
    }

    /// Attach or detach a statistics collector for an already registered
    /// file. No-op unless a statistics registry is configured.
    pub fn collect_file_statistics(
        &self,
        path: &str,
        collector: Option<Arc<FileStatisticsCollector>>,
    ) {
        let file = {
            let registry = self.state.lock();
            if registry.statistics.is_none() {
                return;
            }
            match registry.files_by_name.get(path) {
                Some(file) => file.clone(),
                None => return,
            }
        };
        let mut state = file.state.write();
        // Idempotent in both directions
        if collector.is_some() && state.stats.is_some() {
            return;
        }
        if collector.is_none() && state.stats.is_none() {
            return;
        }
        match collector {
            Some(collector) => {
                collector.resize(state.file_size);
                state.stats = Some(collector);
            }
            None => state.stats = None,
        }
    }

    /// Clear every thread's read-ahead window for the file.
    pub(crate) fn invalidate_readaheads(&self, file_id: u32) {
        let readaheads = self.readaheads.lock();
        for buffer in readaheads.values() {
            buffer.invalidate(file_id);
        }
    }

    fn readahead_for_current_thread(&self) -> Arc<ReadAheadBuffer> {
        let tid = std::thread::current().id();
        let mut readaheads = self.readaheads.lock();
        readaheads
            .entry(tid)
            .or_insert_with(|| Arc::new(ReadAheadBuffer::new()))
            .clone()
    }

    #[cfg(test)]
    fn registered_file_count(&self) -> usize {
        self.state.lock().files_by_name.len()
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("file_id", &self.file.file_id)
            .field("file_name", &self.file.file_name)
            .finish()
    }
}

/// Reference-counted open handle to a registered file
pub struct FileHandle {
    fs: Arc<VirtualFileSystem>,
    file: Arc<VirtualFile>,
    position: AtomicU64,
    /// Resolved lazily on the first non-buffered read
    readahead: OnceCell<Arc<ReadAheadBuffer>>,
}

impl FileHandle {
    /// Callers must hold the registry mutex so the count cannot race a drop.
    fn new(fs: Arc<VirtualFileSystem>, file: Arc<VirtualFile>) -> Self {
        file.handle_count.fetch_add(1, Ordering::AcqRel);
        Self {
            fs,
            file,
            position: AtomicU64::new(0),
            readahead: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.file.file_name
    }

    pub fn file_id(&self) -> u32 {
        self.file.file_id
    }

    pub fn data_url(&self) -> Option<&str> {
        self.file.data_url.as_deref()
    }

    pub fn protocol(&self) -> DataProtocol {
        self.file.state.read().protocol
    }

    pub fn file_size(&self) -> u64 {
        self.file.state.read().file_size
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn seek(&self, position: u64) {
        self.position.store(position, Ordering::Release);
    }

    pub fn reset(&self) {
        self.seek(0);
    }

    /// Read at the current position; advances by the bytes returned.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let file = &self.file;
        let state = file.state.read();
        let position = self.position.load(Ordering::Acquire);
        match state.protocol {
            DataProtocol::Buffer => {
                let data = state.buffer.as_ref().map(|b| b.get()).unwrap_or(&[]);
                let pos = (position as usize).min(data.len());
                let n = buf.len().min(data.len() - pos);
                buf[..n].copy_from_slice(&data[pos..pos + n]);
                if let Some(stats) = &state.stats {
                    stats.register_read_cached(position, n);
                }
                self.position.store(position + n as u64, Ordering::Release);
                Ok(n)
            }
            DataProtocol::Native | DataProtocol::Http => {
                let readahead = self
                    .readahead
                    .get_or_init(|| self.fs.readahead_for_current_thread());
                let runtime = &self.fs.runtime;
                let file_id = file.file_id;
                let mut fetch =
                    |out: &mut [u8], offset: u64| runtime.read(file_id, out, offset);
                let n = readahead.read(
                    file_id,
                    state.file_size,
                    buf,
                    position,
                    &mut fetch,
                    state.stats.as_deref(),
                )?;
                self.position.store(position + n as u64, Ordering::Release);
                Ok(n)
            }
        }
    }

    /// Positional read: seeks, then reads until `buf` is full or EOF.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.seek(offset);
        let mut done = 0;
        while done < buf.len() {
            let n = self.read(&mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// Write at the current position; advances past the written bytes.
    /// Writes past the end extend the file. HTTP files are read-only.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let file = &self.file;
        let mut state = file.state.write();
        let position = self.position.load(Ordering::Acquire);
        let written = match state.protocol {
            DataProtocol::Buffer => {
                let end = position + buf.len() as u64;
                let buffer_size = state.buffer.as_ref().map(|b| b.size()).unwrap_or(0) as u64;
                if end > buffer_size {
                    let new_size = end.max(state.file_size);
                    if let Some(buffer) = state.buffer.as_mut() {
                        buffer.resize(new_size as usize);
                    }
                    state.file_size = new_size;
                    if let Some(stats) = &state.stats {
                        stats.resize(new_size);
                    }
                }
                let buffer = state
                    .buffer
                    .as_mut()
                    .ok_or_else(|| DbError::Invalid("buffer file without content".to_string()))?;
                buffer.get_mut()[position as usize..end as usize].copy_from_slice(buf);
                if let Some(stats) = &state.stats {
                    stats.register_write(position, buf.len());
                }
                self.position.store(end, Ordering::Release);
                buf.len()
            }
            DataProtocol::Native => {
                let n = self.fs.runtime.write(file.file_id, buf, position)?;
                let end = position + n as u64;
                if end > state.file_size {
                    state.file_size = end;
                    if let Some(stats) = &state.stats {
                        stats.resize(end);
                    }
                }
                if let Some(stats) = &state.stats {
                    stats.register_write(position, n);
                }
                self.position.store(end, Ordering::Release);
                n
            }
            DataProtocol::Http => {
                return Err(DbError::NotSupported(
                    "writing to HTTP files".to_string(),
                ))
            }
        };
        drop(state);
        self.fs.invalidate_readaheads(file.file_id);
        Ok(written)
    }

    /// Positional write: seeks, then writes the whole buffer.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.seek(offset);
        let mut done = 0;
        while done < buf.len() {
            let n = self.write(&buf[done..])?;
            if n == 0 {
                return Err(DbError::Io(format!(
                    "host write made no progress on '{}'",
                    self.name()
                )));
            }
            done += n;
        }
        Ok(done)
    }

    /// Resize the file; growing zero-extends.
    pub fn truncate(&self, new_size: u64) -> Result<()> {
        let file = &self.file;
        let mut state = file.state.write();
        match state.protocol {
            DataProtocol::Buffer => {
                if let Some(buffer) = state.buffer.as_mut() {
                    buffer.resize(new_size as usize);
                }
            }
            DataProtocol::Native | DataProtocol::Http => {
                self.fs.runtime.truncate(file.file_id, new_size)?;
            }
        }
        if let Some(stats) = &state.stats {
            stats.resize(new_size);
        }
        state.file_size = new_size;
        drop(state);
        self.fs.invalidate_readaheads(file.file_id);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let state = self.file.state.read();
        match state.protocol {
            DataProtocol::Buffer => Ok(()),
            DataProtocol::Native | DataProtocol::Http => {
                Ok(self.fs.runtime.sync(self.file.file_id)?)
            }
        }
    }

    pub fn last_modified(&self) -> Result<i64> {
        let state = self.file.state.read();
        match state.protocol {
            DataProtocol::Buffer => Ok(0),
            DataProtocol::Native | DataProtocol::Http => {
                Ok(self.fs.runtime.last_modified(self.file.file_id)?)
            }
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let file = self.file.clone();
        // Try for the exclusive file lock; when another thread is mid
        // operation it will observe the zero handle count on its own.
        let file_guard = file.state.try_write();
        let registry = self.fs.state.lock();
        if file.handle_count.fetch_sub(1, Ordering::AcqRel) > 1 {
            return;
        }
        let Some(file_guard) = file_guard else {
            return;
        };
        // Buffer files stay registered until dropped explicitly
        if file_guard.protocol == DataProtocol::Buffer {
            return;
        }
        // Close in the runtime without holding the registry mutex
        drop(registry);
        self.fs.runtime.close(file.file_id);
        let mut registry = self.fs.state.lock();
        if registry
            .files_by_name
            .get(&file.file_name)
            .map_or(false, |f| Arc::ptr_eq(f, &file))
        {
            registry.files_by_name.remove(&file.file_name);
            registry.files_by_id.remove(&file.file_id);
        }
    }
}
