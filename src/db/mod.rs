//! Database facade
//!
//! Owns the engine instance and everything underneath it: the virtual
//! filesystem, the file page buffer, the buffered filesystem the engine
//! sees, the statistics registry, registered-file pins and the set of open
//! connections. `open` rebuilds the engine against a fresh buffered
//! filesystem; registered files survive because the facade pins their
//! handles.

mod arrow_patch;
mod config;
mod connection;
mod insert_options;
#[cfg(test)]
pub(crate) mod mock;

pub use arrow_patch::{patch_record_batch, patch_schema};
pub use config::{DatabaseConfig, FilesystemConfig};
pub use connection::Connection;
pub use insert_options::{
    infer_table_shape, ArrowInsertOptions, ColumnSpec, CsvInsertOptions, JsonInsertOptions,
    JsonTableShape,
};

use std::sync::Arc;

use ahash::AHashMap;

use crate::buffer::{BufferedFileSystem, FileConfig, FilePageBuffer};
use crate::engine::{Engine, EngineDatabase, EngineOptions};
use crate::runtime::HostRuntime;
use crate::stats::FileStatisticsRegistry;
use crate::vfs::{DataBuffer, FileHandle, OpenFlags, VirtualFileSystem};
use crate::{DbError, Result};

/// Feature bit: results carry native 64-bit integer columns
pub const FEATURE_EMIT_BIGINT: u32 = 1;

pub type ConnectionId = u64;

/// The embedded database
pub struct Database {
    engine: Box<dyn Engine>,
    config: Arc<DatabaseConfig>,

    vfs: Arc<VirtualFileSystem>,
    page_buffer: Arc<FilePageBuffer>,
    buffered_fs: Arc<BufferedFileSystem>,
    database: Box<dyn EngineDatabase>,

    connections: AHashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,

    file_stats: Arc<FileStatisticsRegistry>,
    /// Handles keeping registered files alive across engine resets
    pinned_files: AHashMap<String, FileHandle>,
}

impl Database {
    /// Construct with the default (in-memory) configuration. Failure to
    /// bring up the engine here is fatal for the embedding.
    pub fn new(engine: Box<dyn Engine>, runtime: Arc<dyn HostRuntime>) -> Result<Self> {
        let config = DatabaseConfig::default();
        let vfs = VirtualFileSystem::new(runtime);
        let file_stats = Arc::new(FileStatisticsRegistry::new());
        vfs.configure_statistics(Some(file_stats.clone()));
        let page_buffer = FilePageBuffer::new(vfs.clone());
        page_buffer.configure_statistics(Some(file_stats.clone()));
        let buffered_fs = BufferedFileSystem::new(page_buffer.clone());

        let database = Self::open_engine(engine.as_ref(), &config, buffered_fs.clone())?;
        vfs.set_allow_full_http_reads(config.filesystem.allow_full_http_reads);

        Ok(Self {
            engine,
            config: Arc::new(config),
            vfs,
            page_buffer,
            buffered_fs,
            database,
            connections: AHashMap::new(),
            next_connection_id: 0,
            file_stats,
            pinned_files: AHashMap::new(),
        })
    }

    fn open_engine(
        engine: &dyn Engine,
        config: &DatabaseConfig,
        buffered_fs: Arc<BufferedFileSystem>,
    ) -> Result<Box<dyn EngineDatabase>> {
        let options = EngineOptions {
            path: config.path.clone(),
            read_only: !config.in_memory(),
            maximum_threads: config.maximum_threads,
        };
        let database = engine.open(&options, buffered_fs).map_err(|e| {
            DbError::Invalid(format!("opening the database failed with error: {e}"))
        })?;
        database.load_extension("parquet")?;
        Ok(database)
    }

    /// Reconstruct the engine from a JSON config payload. Existing
    /// connections are closed; registered files stay pinned.
    pub fn open(&mut self, args_json: &str) -> Result<()> {
        let config = DatabaseConfig::read_from(args_json)?;
        self.open_with_config(config)
    }

    fn open_with_config(&mut self, config: DatabaseConfig) -> Result<()> {
        let buffered_fs = BufferedFileSystem::new(self.page_buffer.clone());
        let database = Self::open_engine(&*self.engine, &config, buffered_fs.clone())?;

        self.connections.clear();
        self.database = database;
        self.buffered_fs = buffered_fs;
        self.vfs
            .set_allow_full_http_reads(config.filesystem.allow_full_http_reads);
        self.config = Arc::new(config);
        log::info!(
            "engine opened (path: '{}', in-memory: {})",
            self.config.path,
            self.config.in_memory()
        );
        Ok(())
    }

    /// Re-open with the current configuration.
    pub fn reset(&mut self) -> Result<()> {
        let config = (*self.config).clone();
        self.open_with_config(config)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn filesystem(&self) -> &Arc<VirtualFileSystem> {
        &self.vfs
    }

    pub fn page_buffer(&self) -> &Arc<FilePageBuffer> {
        &self.page_buffer
    }

    pub fn buffered_filesystem(&self) -> &Arc<BufferedFileSystem> {
        &self.buffered_fs
    }

    pub fn get_version(&self) -> String {
        self.database.version()
    }

    pub fn get_feature_flags(&self) -> u32 {
        if self.config.emit_bigint {
            FEATURE_EMIT_BIGINT
        } else {
            0
        }
    }

    /// Tokenize a script; returns `{offsets, types}` as JSON.
    pub fn tokenize(&self, text: &str) -> Result<String> {
        let tokens = self.database.tokenize(text);
        serde_json::to_string(&tokens)
            .map_err(|e| DbError::Invalid(format!("tokenizer output: {e}")))
    }

    /// Create a session.
    pub fn connect(&mut self) -> Result<ConnectionId> {
        let conn = self.database.connect()?;
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(
            id,
            Connection::new(conn, self.config.clone(), self.page_buffer.clone()),
        );
        Ok(id)
    }

    pub fn connection(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// End a session, discarding any in-flight streamed result.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Register a file URL and pin it so it survives without engine
    /// handles. Fails while the old incarnation still has buffered pages.
    pub fn register_file_url(
        &mut self,
        file_name: &str,
        file_url: &str,
        file_size: Option<u64>,
    ) -> Result<()> {
        if !self.buffered_fs.try_drop_file(file_name) {
            return Err(DbError::Invalid(
                "File is already registered and is still buffered".to_string(),
            ));
        }
        self.pinned_files.remove(file_name);
        let handle = self.vfs.register_file_url(file_name, file_url, file_size)?;
        self.pinned_files.insert(handle.name().to_string(), handle);
        Ok(())
    }

    /// Register in-memory bytes as a file. Buffer files bypass the page
    /// cache via direct I/O.
    pub fn register_file_buffer(&mut self, file_name: &str, buffer: Vec<u8>) -> Result<()> {
        if !self.buffered_fs.try_drop_file(file_name) {
            return Err(DbError::Invalid(
                "File is already registered and is still buffered".to_string(),
            ));
        }
        self.pinned_files.remove(file_name);
        let handle = self
            .vfs
            .register_file_buffer(file_name, DataBuffer::from_vec(buffer))?;
        self.buffered_fs.register_file(
            file_name,
            FileConfig {
                force_direct_io: true,
            },
        );
        self.pinned_files.insert(handle.name().to_string(), handle);
        Ok(())
    }

    /// Drop one file; `Busy` while other handles keep it alive.
    pub fn drop_file(&mut self, file_name: &str) -> Result<()> {
        self.page_buffer.try_drop_file(file_name);
        self.pinned_files.remove(file_name);
        if !self.vfs.try_drop_file(file_name) {
            return Err(DbError::Busy);
        }
        Ok(())
    }

    /// Drop everything no longer held.
    pub fn drop_files(&mut self) {
        self.page_buffer.drop_dangling_files();
        self.pinned_files.clear();
        self.vfs.drop_dangling_files();
    }

    pub fn flush_files(&self) -> Result<()> {
        self.page_buffer.flush_files()
    }

    pub fn flush_file(&self, path: &str) -> Result<()> {
        self.page_buffer.flush_file(path)
    }

    pub fn set_file_descriptor(&self, file_id: u32, fd: u32) -> Result<()> {
        self.vfs.set_file_descriptor(file_id, fd)
    }

    pub fn get_file_info(&self, file_id: u32) -> Result<String> {
        let info = self.vfs.file_info_by_id(file_id);
        serde_json::to_string(&info).map_err(|e| DbError::Invalid(e.to_string()))
    }

    pub fn get_file_info_by_name(&self, file_name: &str) -> Result<String> {
        let info = self.vfs.file_info_by_name(file_name);
        serde_json::to_string(&info).map_err(|e| DbError::Invalid(e.to_string()))
    }

    /// Expand a glob and return the matching file infos as a JSON array.
    pub fn glob_file_infos(&self, expression: &str) -> Result<String> {
        let names = self.vfs.glob(expression)?;
        let infos: Vec<serde_json::Value> = names
            .iter()
            .map(|name| self.vfs.file_info_by_name(name))
            .filter(|info| !info.is_null())
            .collect();
        serde_json::to_string(&infos).map_err(|e| DbError::Invalid(e.to_string()))
    }

    /// Enable or disable statistics collection for a path.
    pub fn collect_file_statistics(&self, path: &str, enable: bool) -> Result<()> {
        let collector = self.file_stats.enable_collector(path, enable);
        self.vfs.collect_file_statistics(path, collector.clone());
        self.page_buffer.collect_file_statistics(path, collector);
        Ok(())
    }

    /// Export the binary statistics of a path; `Invalid` for unknown paths.
    pub fn export_file_statistics(&self, path: &str) -> Result<Vec<u8>> {
        self.file_stats.export_statistics(path)
    }

    /// Read a whole file through the engine filesystem into an owned
    /// buffer.
    pub fn copy_file_to_buffer(&self, path: &str) -> Result<Vec<u8>> {
        let mut src = self.buffered_fs.open_file(path, OpenFlags::read())?;
        let size = src.file_size() as usize;
        let mut out = vec![0u8; size];
        let mut done = 0;
        while done < size {
            let n = src.read(&mut out[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        out.truncate(done);
        Ok(out)
    }

    /// Copy `path` to `out` through the engine filesystem in 16 KiB chunks.
    pub fn copy_file_to_path(&self, path: &str, out: &str) -> Result<()> {
        let mut src = self.buffered_fs.open_file(path, OpenFlags::read())?;
        let mut dst = self.buffered_fs.open_file(out, OpenFlags::create_new())?;
        let mut buffer = vec![0u8; 16 * 1024];
        loop {
            let n = src.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                let m = dst.write(&buffer[written..n])?;
                if m == 0 {
                    return Err(DbError::Io(format!("copy to '{out}' made no progress")));
                }
                written += m;
            }
        }
        dst.sync()
    }
}
