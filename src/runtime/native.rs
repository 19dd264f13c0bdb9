//! Native filesystem runtime
//!
//! Serves [`HostRuntime`](super::HostRuntime) calls from the local
//! filesystem. Open handles live in per-thread local state, mirroring the
//! suspension model of the sandboxed host: each thread lazily opens its own
//! handle for a file id the first time it touches it.

use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::thread::ThreadId;
use std::time::UNIX_EPOCH;

use ahash::AHashMap;
use parking_lot::Mutex;

use super::{HostError, HostResult, HostRuntime, OpenedFile};
use crate::vfs::glob_to_regex;

/// Per-thread runtime scratch state
#[derive(Default)]
struct LocalState {
    /// Open file handles keyed by file id
    handles: AHashMap<u32, File>,
}

/// Host runtime backed by the local filesystem
pub struct NativeRuntime {
    /// Backing path per open file id
    paths: Mutex<AHashMap<u32, String>>,
    local_states: Mutex<AHashMap<ThreadId, LocalState>>,
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self {
            paths: Mutex::new(AHashMap::new()),
            local_states: Mutex::new(AHashMap::new()),
        }
    }

    fn open_rw(path: &str) -> HostResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?)
    }

    /// Run `f` on this thread's handle for the file, opening it lazily.
    fn with_handle<T>(&self, file_id: u32, f: impl FnOnce(&File) -> HostResult<T>) -> HostResult<T> {
        let tid = std::thread::current().id();
        let mut states = self.local_states.lock();
        let state = states.entry(tid).or_default();
        let file = match state.handles.entry(file_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = { self.paths.lock().get(&file_id).cloned() }
                    .ok_or(HostError::UnknownFile)?;
                entry.insert(Self::open_rw(&path)?)
            }
        };
        f(file)
    }
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime for NativeRuntime {
    fn open(&self, file_id: u32, data_url: &str) -> HostResult<OpenedFile> {
        let file = Self::open_rw(data_url)?;
        let file_size = file.metadata()?.len();
        self.paths.lock().insert(file_id, data_url.to_string());

        let tid = std::thread::current().id();
        let mut states = self.local_states.lock();
        states.entry(tid).or_default().handles.insert(file_id, file);
        Ok(OpenedFile {
            file_size,
            inline_buffer: None,
        })
    }

    fn close(&self, file_id: u32) {
        self.paths.lock().remove(&file_id);
        let tid = std::thread::current().id();
        let mut states = self.local_states.lock();
        if let Some(state) = states.get_mut(&tid) {
            state.handles.remove(&file_id);
        }
    }

    fn sync(&self, file_id: u32) -> HostResult<()> {
        self.with_handle(file_id, |file| {
            file.sync_all()?;
            Ok(())
        })
    }

    fn truncate(&self, file_id: u32, new_size: u64) -> HostResult<()> {
        self.with_handle(file_id, |file| {
            file.set_len(new_size)?;
            Ok(())
        })
    }

    fn last_modified(&self, file_id: u32) -> HostResult<i64> {
        self.with_handle(file_id, |file| {
            let modified = file.metadata()?.modified()?;
            let secs = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            Ok(secs)
        })
    }

    fn read(&self, file_id: u32, buf: &mut [u8], offset: u64) -> HostResult<usize> {
        self.with_handle(file_id, |file| {
            let file_size = file.metadata()?.len();
            let safe_offset = offset.min(file_size);
            let read_here = ((file_size - safe_offset) as usize).min(buf.len());
            file.read_exact_at(&mut buf[..read_here], safe_offset)?;
            Ok(read_here)
        })
    }

    fn write(&self, file_id: u32, buf: &[u8], offset: u64) -> HostResult<usize> {
        self.with_handle(file_id, |file| {
            file.write_all_at(buf, offset)?;
            Ok(buf.len())
        })
    }

    fn dir_exists(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn dir_create(&self, path: &str) -> HostResult<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn dir_remove(&self, path: &str) -> HostResult<()> {
        std::fs::remove_dir_all(path)?;
        Ok(())
    }

    fn list_files(&self, path: &str, callback: &mut dyn FnMut(&str, bool)) -> bool {
        let Ok(entries) = std::fs::read_dir(path) else {
            return false;
        };
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            callback(&entry.file_name().to_string_lossy(), is_dir);
        }
        true
    }

    fn glob(&self, pattern: &str) -> HostResult<Vec<String>> {
        // Single-directory expansion: split at the last separator before the
        // first wildcard and match entries of that directory.
        if !pattern.contains(['*', '?', '[']) {
            if Path::new(pattern).exists() {
                return Ok(vec![pattern.to_string()]);
            }
            return Ok(Vec::new());
        }
        let regex = glob_to_regex(pattern).map_err(|e| HostError::Io(e.to_string()))?;
        let wildcard_pos = pattern.find(['*', '?', '[']).unwrap_or(0);
        let dir: PathBuf = match pattern[..wildcard_pos].rfind('/') {
            Some(sep) => PathBuf::from(&pattern[..sep]),
            None => PathBuf::from("."),
        };
        let mut results = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path().to_string_lossy().into_owned();
                if regex.is_match(&path) {
                    results.push(path);
                }
            }
        }
        Ok(results)
    }

    fn file_move(&self, from: &str, to: &str) -> HostResult<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn file_exists(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_open_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let runtime = NativeRuntime::new();
        let opened = runtime.open(1, path.to_str().unwrap()).unwrap();
        assert_eq!(opened.file_size, 11);
        assert!(opened.inline_buffer.is_none());

        let mut buf = [0u8; 5];
        let n = runtime.read(1, &mut buf, 6).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");

        // Reads past EOF are clamped
        let n = runtime.read(1, &mut buf, 100).unwrap();
        assert_eq!(n, 0);

        let n = runtime.write(1, b"WORLD", 6).unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 11];
        runtime.read(1, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello WORLD");

        runtime.close(1);
        assert!(matches!(
            runtime.read(1, &mut buf, 0),
            Err(HostError::UnknownFile)
        ));
    }

    #[test]
    fn test_lazy_open_per_thread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abc").unwrap();

        let runtime = Arc::new(NativeRuntime::new());
        runtime.open(7, path.to_str().unwrap()).unwrap();

        // Another thread lazily opens its own handle for the same file id
        let rt = runtime.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 3];
            assert_eq!(rt.read(7, &mut buf, 0).unwrap(), 3);
            assert_eq!(&buf, b"abc");
        })
        .join()
        .unwrap();

        // Once closed, fresh threads no longer resolve the id
        runtime.close(7);
        let rt = runtime.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 3];
            assert!(matches!(
                rt.read(7, &mut buf, 0),
                Err(HostError::UnknownFile)
            ));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_glob_single_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.parquet"), b"x").unwrap();
        std::fs::write(dir.path().join("b.parquet"), b"x").unwrap();
        std::fs::write(dir.path().join("c.csv"), b"x").unwrap();

        let runtime = NativeRuntime::new();
        let pattern = format!("{}/*.parquet", dir.path().display());
        let mut results = runtime.glob(&pattern).unwrap();
        results.sort();
        assert_eq!(results.len(), 2);
        assert!(results[0].ends_with("a.parquet"));
        assert!(results[1].ends_with("b.parquet"));
    }

    #[test]
    fn test_truncate_and_last_modified() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let runtime = NativeRuntime::new();
        runtime.open(3, path.to_str().unwrap()).unwrap();
        runtime.truncate(3, 4).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4);
        assert!(runtime.last_modified(3).unwrap() > 0);
    }
}
