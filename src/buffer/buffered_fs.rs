//! Engine-facing filesystem adapter
//!
//! Presents the filesystem contract the SQL engine compiles against and
//! routes every open: in-memory files and files registered for direct I/O
//! go straight to the virtual filesystem, everything else is paged through
//! the file page buffer.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use super::{FilePageBuffer, PageFileRef};
use crate::engine::{EngineFileHandle, EngineFileSystem};
use crate::vfs::{DataProtocol, FileHandle, OpenFlags, VirtualFileSystem};
use crate::Result;

/// Per-file open configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfig {
    /// Bypass the page buffer entirely
    pub force_direct_io: bool,
}

/// The engine's filesystem
pub struct BufferedFileSystem {
    pool: Arc<FilePageBuffer>,
    fs: Arc<VirtualFileSystem>,
    file_configs: Mutex<AHashMap<String, FileConfig>>,
}

impl BufferedFileSystem {
    pub fn new(pool: Arc<FilePageBuffer>) -> Arc<Self> {
        let fs = pool.filesystem().clone();
        Arc::new(Self {
            pool,
            fs,
            file_configs: Mutex::new(AHashMap::new()),
        })
    }

    pub fn page_buffer(&self) -> &Arc<FilePageBuffer> {
        &self.pool
    }

    pub fn filesystem(&self) -> &Arc<VirtualFileSystem> {
        &self.fs
    }

    /// Register per-file open configuration (e.g. direct I/O for raw
    /// buffers).
    pub fn register_file(&self, file_name: &str, config: FileConfig) {
        self.file_configs
            .lock()
            .insert(file_name.to_string(), config);
    }

    /// Drop a file from the page buffer; see
    /// [`FilePageBuffer::try_drop_file`] for the refusal conditions.
    pub fn try_drop_file(&self, file_name: &str) -> bool {
        if !self.pool.try_drop_file(file_name) {
            return false;
        }
        self.file_configs.lock().remove(file_name);
        true
    }

    pub fn open_file(&self, path: &str, flags: OpenFlags) -> Result<BufferedFileHandle> {
        let direct = self
            .file_configs
            .lock()
            .get(path)
            .map(|c| c.force_direct_io)
            .unwrap_or(false);
        let handle = self.fs.open_file(path, flags)?;
        if direct || handle.protocol() == DataProtocol::Buffer {
            return Ok(BufferedFileHandle {
                kind: HandleKind::Direct(handle),
                position: 0,
            });
        }
        let file_ref = self.pool.adopt_handle(handle, flags)?;
        Ok(BufferedFileHandle {
            kind: HandleKind::Paged(file_ref),
            position: 0,
        })
    }

    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        self.fs.glob(pattern)
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.fs.file_exists(path)
    }

    pub fn dir_exists(&self, path: &str) -> bool {
        self.fs.dir_exists(path)
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.fs.create_directory(path)
    }

    pub fn remove_directory(&self, path: &str) -> Result<()> {
        self.fs.remove_directory(path)
    }

    pub fn list_files(&self, path: &str, callback: &mut dyn FnMut(&str, bool)) -> bool {
        self.fs.list_files(path, callback)
    }

    pub fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.fs.move_file(from, to)
    }
}

enum HandleKind {
    /// Direct I/O against the virtual filesystem
    Direct(FileHandle),
    /// Routed through the page buffer
    Paged(PageFileRef),
}

/// One open engine-side file
pub struct BufferedFileHandle {
    kind: HandleKind,
    position: u64,
}

impl BufferedFileHandle {
    pub fn name(&self) -> &str {
        match &self.kind {
            HandleKind::Direct(h) => h.name(),
            HandleKind::Paged(r) => r.name(),
        }
    }

    pub fn file_size(&self) -> u64 {
        match &self.kind {
            HandleKind::Direct(h) => h.file_size(),
            HandleKind::Paged(r) => r.file_size(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Seek is a handle-local position update.
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match &self.kind {
            HandleKind::Direct(h) => h.read_at(buf, self.position)?,
            HandleKind::Paged(r) => r.read(buf, self.position)?,
        };
        self.position += n as u64;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = match &self.kind {
            HandleKind::Direct(h) => h.write_at(buf, self.position)?,
            HandleKind::Paged(r) => r.write(buf, self.position)?,
        };
        self.position += n as u64;
        Ok(n)
    }

    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        match &self.kind {
            HandleKind::Direct(h) => h.truncate(new_size)?,
            HandleKind::Paged(r) => r.truncate(new_size)?,
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        match &self.kind {
            HandleKind::Direct(h) => h.sync(),
            HandleKind::Paged(r) => r.sync(),
        }
    }

    pub fn last_modified(&self) -> Result<i64> {
        match &self.kind {
            HandleKind::Direct(h) => h.last_modified(),
            HandleKind::Paged(r) => r.last_modified(),
        }
    }
}

impl EngineFileSystem for BufferedFileSystem {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn EngineFileHandle>> {
        Ok(Box::new(self.open_file(path, flags)?))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        BufferedFileSystem::glob(self, pattern)
    }

    fn file_exists(&self, path: &str) -> bool {
        BufferedFileSystem::file_exists(self, path)
    }

    fn dir_exists(&self, path: &str) -> bool {
        BufferedFileSystem::dir_exists(self, path)
    }

    fn create_directory(&self, path: &str) -> Result<()> {
        BufferedFileSystem::create_directory(self, path)
    }

    fn remove_directory(&self, path: &str) -> Result<()> {
        BufferedFileSystem::remove_directory(self, path)
    }

    fn list_files(&self, path: &str, callback: &mut dyn FnMut(&str, bool)) -> bool {
        BufferedFileSystem::list_files(self, path, callback)
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        BufferedFileSystem::move_file(self, from, to)
    }
}

impl EngineFileHandle for BufferedFileHandle {
    fn name(&self) -> &str {
        BufferedFileHandle::name(self)
    }

    fn file_size(&self) -> u64 {
        BufferedFileHandle::file_size(self)
    }

    fn position(&self) -> u64 {
        BufferedFileHandle::position(self)
    }

    fn seek(&mut self, position: u64) {
        BufferedFileHandle::seek(self, position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        BufferedFileHandle::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        BufferedFileHandle::write(self, buf)
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        BufferedFileHandle::truncate(self, new_size)
    }

    fn sync(&mut self) -> Result<()> {
        BufferedFileHandle::sync(self)
    }

    fn last_modified(&self) -> Result<i64> {
        BufferedFileHandle::last_modified(self)
    }

    fn can_seek(&self) -> bool {
        true
    }

    // Random reads stay cheap behind the page buffer, so the engine may
    // treat every file as an on-disk file.
    fn on_disk_file(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PAGE_SIZE;
    use crate::runtime::NativeRuntime;
    use crate::vfs::DataBuffer;
    use tempfile::tempdir;

    fn buffered_fs() -> (Arc<BufferedFileSystem>, Arc<VirtualFileSystem>) {
        let fs = VirtualFileSystem::new(Arc::new(NativeRuntime::new()));
        let pool = FilePageBuffer::with_capacity(fs.clone(), 8 * PAGE_SIZE);
        (BufferedFileSystem::new(pool), fs)
    }

    #[test]
    fn test_direct_io_routing_for_registered_buffers() {
        let (buffered, fs) = buffered_fs();
        let _pin = fs
            .register_file_buffer("raw.bin", DataBuffer::from_vec(b"direct".to_vec()))
            .unwrap();
        buffered.register_file(
            "raw.bin",
            FileConfig {
                force_direct_io: true,
            },
        );

        let mut handle = buffered.open_file("raw.bin", OpenFlags::read()).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(handle.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"direct");
        assert!(buffered.pool.state.lock().frames.is_empty());
    }

    #[test]
    fn test_paged_routing_for_native_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");
        std::fs::write(&path, vec![5u8; PAGE_SIZE]).unwrap();
        let url = path.to_str().unwrap().to_string();

        let (buffered, _fs) = buffered_fs();
        let mut handle = buffered.open_file(&url, OpenFlags::read()).unwrap();
        let mut buf = [0u8; 32];
        handle.read(&mut buf).unwrap();
        assert_eq!(handle.position(), 32);
        assert!(!buffered.pool.state.lock().frames.is_empty());
    }

    #[test]
    fn test_seek_and_sequential_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seq.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();
        let url = path.to_str().unwrap().to_string();

        let (buffered, _fs) = buffered_fs();
        let mut handle = buffered.open_file(&url, OpenFlags::read()).unwrap();
        let mut buf = [0u8; 3];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"def");
        handle.seek(1);
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"bcd");
    }

    #[test]
    fn test_write_through_adapter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.bin");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let url = path.to_str().unwrap().to_string();

        let (buffered, _fs) = buffered_fs();
        let mut handle = buffered.open_file(&url, OpenFlags::write()).unwrap();
        handle.seek(10);
        handle.write(b"hello").unwrap();
        assert_eq!(handle.position(), 15);

        handle.seek(10);
        let mut buf = [0u8; 5];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.sync().unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[10..15], b"hello");
    }
}
