//! Engine contract
//!
//! The SQL engine (parsing, planning, execution) is an external
//! collaborator. These traits are the seam it is reached through: the
//! facade opens an [`EngineDatabase`] over the buffered filesystem,
//! connections execute queries and receive results as Arrow record batch
//! streams, and the ingest paths hand work to engine table functions.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use serde::Serialize;

use crate::buffer::BufferedFileSystem;
use crate::vfs::OpenFlags;
use crate::Result;

/// Options the facade opens an engine instance with
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Database path; empty selects in-memory mode
    pub path: String,
    /// Any on-disk database is opened read-only
    pub read_only: bool,
    pub maximum_threads: u32,
}

/// Scalar argument passed to prepared statements and table functions.
/// Numbers travel as doubles; the host boundary has no 64-bit integers.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Double(f64),
    Text(String),
    Bool(bool),
    Null,
}

/// Tokenizer output, one entry per token
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenizedScript {
    pub offsets: Vec<u32>,
    pub types: Vec<u8>,
}

/// The engine library: a factory for database instances.
pub trait Engine: Send + Sync {
    fn open(
        &self,
        options: &EngineOptions,
        filesystem: Arc<BufferedFileSystem>,
    ) -> Result<Box<dyn EngineDatabase>>;
}

/// One engine database instance
pub trait EngineDatabase: Send {
    fn connect(&self) -> Result<Box<dyn EngineConnection>>;
    fn load_extension(&self, name: &str) -> Result<()>;
    fn version(&self) -> String;
    fn tokenize(&self, text: &str) -> TokenizedScript;
}

/// One engine session
pub trait EngineConnection: Send {
    /// Execute SQL; the result arrives as a lazily fetched batch stream.
    fn send_query(&mut self, sql: &str) -> Result<Box<dyn QueryResultStream>>;

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn EnginePreparedStatement>>;

    /// Build a relation over an engine table function, e.g. `read_csv`.
    /// Named arguments are JSON-typed.
    fn table_function(
        &mut self,
        name: &str,
        args: Vec<ParamValue>,
        named_args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Box<dyn TableRelation>>;

    /// Build a relation scanning an Arrow record batch stream. The stream
    /// crosses the boundary as a typed capability, not a raw pointer.
    fn scan_arrow_stream(
        &mut self,
        reader: Box<dyn RecordBatchReader + Send>,
    ) -> Result<Box<dyn TableRelation>>;
}

/// A lazily fetched query result
pub trait QueryResultStream: Send {
    fn schema(&self) -> SchemaRef;
    /// Next batch, or None when exhausted.
    fn fetch(&mut self) -> Result<Option<RecordBatch>>;
}

/// A prepared statement owned by the engine
pub trait EnginePreparedStatement: Send {
    fn execute(&mut self, params: &[ParamValue]) -> Result<Box<dyn QueryResultStream>>;
}

/// A relation that can be materialized into a table
pub trait TableRelation: Send {
    /// Create the target table from this relation.
    fn create(&mut self, schema_name: &str, table_name: &str) -> Result<()>;
    /// Insert this relation into an existing table.
    fn insert(&mut self, schema_name: &str, table_name: &str) -> Result<()>;
}

/// The filesystem contract the engine compiles against; implemented by the
/// buffered filesystem adapter.
pub trait EngineFileSystem: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn EngineFileHandle>>;
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;
    fn file_exists(&self, path: &str) -> bool;
    fn dir_exists(&self, path: &str) -> bool;
    fn create_directory(&self, path: &str) -> Result<()>;
    fn remove_directory(&self, path: &str) -> Result<()>;
    fn list_files(&self, path: &str, callback: &mut dyn FnMut(&str, bool)) -> bool;
    fn move_file(&self, from: &str, to: &str) -> Result<()>;
}

/// An open engine-side file
pub trait EngineFileHandle: Send {
    fn name(&self) -> &str;
    fn file_size(&self) -> u64;
    fn position(&self) -> u64;
    fn seek(&mut self, position: u64);
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn truncate(&mut self, new_size: u64) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
    fn last_modified(&self) -> Result<i64>;
    fn can_seek(&self) -> bool;
    fn on_disk_file(&self) -> bool;
}
