//! Connection
//!
//! One connection owns one engine session. Query results are marshalled
//! into Arrow IPC buffers: `run_query` materializes the whole result as an
//! IPC file, `send_query`/`fetch_query_results` stream the schema first and
//! then one encoded record batch per fetch. At most one streamed result is
//! in flight per connection.

use std::io::Cursor;
use std::sync::Arc;

use ahash::AHashMap;
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::{
    write_message, DictionaryTracker, FileWriter, IpcDataGenerator, IpcWriteOptions,
};

use super::arrow_patch::{patch_record_batch, patch_schema};
use super::config::DatabaseConfig;
use super::insert_options::{
    infer_table_shape, ArrowInsertOptions, CsvInsertOptions, JsonInsertOptions, JsonTableShape,
};
use crate::buffer::{FilePageBuffer, InputFileStream};
use crate::engine::{EngineConnection, EnginePreparedStatement, ParamValue, QueryResultStream};
use crate::{DbError, Result};

/// Incremental Arrow IPC stream accumulator.
///
/// Consumes chunks, walking complete message frames to find the in-stream
/// end marker; the full byte run is handed to a stream reader once EOS is
/// seen.
struct IpcStreamBuffer {
    bytes: Vec<u8>,
    scan_pos: usize,
    eos: bool,
}

impl IpcStreamBuffer {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            scan_pos: 0,
            eos: false,
        }
    }

    fn consume(&mut self, chunk: &[u8]) -> Result<()> {
        self.bytes.extend_from_slice(chunk);
        while !self.eos {
            let remaining = &self.bytes[self.scan_pos..];
            if remaining.len() < 4 {
                break;
            }
            let word = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]);
            // Continuation framing puts the metadata length after the
            // marker; legacy framing starts with the length directly.
            let (header, metadata_len) = if word == 0xFFFF_FFFF {
                if remaining.len() < 8 {
                    break;
                }
                let len =
                    u32::from_le_bytes([remaining[4], remaining[5], remaining[6], remaining[7]]);
                (8usize, len as usize)
            } else {
                (4usize, word as usize)
            };
            if metadata_len == 0 {
                self.scan_pos += header;
                self.eos = true;
                break;
            }
            if remaining.len() < header + metadata_len {
                break;
            }
            let metadata = &remaining[header..header + metadata_len];
            let message = arrow::ipc::root_as_message(metadata)
                .map_err(|e| DbError::Invalid(format!("invalid arrow ipc message: {e}")))?;
            let body_len = message.bodyLength() as usize;
            if remaining.len() < header + metadata_len + body_len {
                break;
            }
            self.scan_pos += header + metadata_len + body_len;
        }
        Ok(())
    }

    fn is_eos(&self) -> bool {
        self.eos
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

struct ArrowInsertState {
    options: ArrowInsertOptions,
    stream: IpcStreamBuffer,
}

/// A per-session engine connection with streaming and prepared-statement
/// state
pub struct Connection {
    conn: Box<dyn EngineConnection>,
    config: Arc<DatabaseConfig>,
    pool: Arc<FilePageBuffer>,

    /// The in-flight streamed result, if any
    current_stream: Option<Box<dyn QueryResultStream>>,
    current_schema: Option<SchemaRef>,
    current_schema_patched: Option<SchemaRef>,

    prepared: AHashMap<u64, Box<dyn EnginePreparedStatement>>,
    next_statement_id: u64,

    /// Partial Arrow IPC insert, if any
    arrow_insert: Option<ArrowInsertState>,
}

impl Connection {
    pub(crate) fn new(
        conn: Box<dyn EngineConnection>,
        config: Arc<DatabaseConfig>,
        pool: Arc<FilePageBuffer>,
    ) -> Self {
        Self {
            conn,
            config,
            pool,
            current_stream: None,
            current_schema: None,
            current_schema_patched: None,
            prepared: AHashMap::new(),
            next_statement_id: 0,
            arrow_insert: None,
        }
    }

    fn clear_streaming_state(&mut self) {
        self.current_stream = None;
        self.current_schema = None;
        self.current_schema_patched = None;
    }

    fn patched_schema(&self, schema: &SchemaRef) -> SchemaRef {
        if self.config.emit_bigint {
            schema.clone()
        } else {
            patch_schema(schema)
        }
    }

    /// Materialize a result end to end into an Arrow IPC file buffer.
    fn materialize_query_result(
        &mut self,
        mut stream: Box<dyn QueryResultStream>,
    ) -> Result<Vec<u8>> {
        self.clear_streaming_state();

        let schema = stream.schema();
        let patched = self.patched_schema(&schema);
        let mut writer = FileWriter::try_new(Vec::new(), patched.as_ref())?;
        while let Some(batch) = stream.fetch()? {
            if batch.num_rows() == 0 {
                break;
            }
            let batch = patch_record_batch(&batch, &patched)?;
            writer.write(&batch)?;
        }
        writer.finish()?;
        Ok(writer.into_inner()?)
    }

    /// Keep the result for fetching and return the serialized schema.
    fn stream_query_result(&mut self, stream: Box<dyn QueryResultStream>) -> Result<Vec<u8>> {
        let schema = stream.schema();
        let patched = self.patched_schema(&schema);

        self.current_stream = Some(stream);
        self.current_schema = Some(schema);
        self.current_schema_patched = Some(patched.clone());

        let options = IpcWriteOptions::default();
        let data_gen = IpcDataGenerator::default();
        let mut dict_tracker = DictionaryTracker::new(false);
        let encoded =
            data_gen.schema_to_bytes_with_dictionary_tracker(&patched, &mut dict_tracker, &options);
        let mut buffer = Vec::new();
        write_message(&mut buffer, encoded, &options)?;
        Ok(buffer)
    }

    /// Run a query and materialize the full result.
    pub fn run_query(&mut self, sql: &str) -> Result<Vec<u8>> {
        let stream = self.conn.send_query(sql)?;
        self.materialize_query_result(stream)
    }

    /// Start a streamed query; returns the schema buffer. A previous
    /// in-flight stream is discarded.
    pub fn send_query(&mut self, sql: &str) -> Result<Vec<u8>> {
        self.clear_streaming_state();
        let stream = self.conn.send_query(sql)?;
        self.stream_query_result(stream)
    }

    /// Fetch the next record batch of the streamed result as an encoded IPC
    /// message, or None when the stream is exhausted (or none is active).
    pub fn fetch_query_results(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(stream) = self.current_stream.as_mut() else {
            return Ok(None);
        };
        let Some(batch) = stream.fetch()? else {
            self.clear_streaming_state();
            return Ok(None);
        };
        let patched = self
            .current_schema_patched
            .clone()
            .unwrap_or_else(|| batch.schema());
        let batch = patch_record_batch(&batch, &patched)?;

        let options = IpcWriteOptions::default();
        let data_gen = IpcDataGenerator::default();
        let mut dict_tracker = DictionaryTracker::new(false);
        let (dictionaries, data) = data_gen.encoded_batch(&batch, &mut dict_tracker, &options)?;
        let mut buffer = Vec::new();
        for dictionary in dictionaries {
            write_message(&mut buffer, dictionary, &options)?;
        }
        write_message(&mut buffer, data, &options)?;
        Ok(Some(buffer))
    }

    /// Prepare a statement and return its identifier.
    pub fn create_prepared_statement(&mut self, sql: &str) -> Result<u64> {
        let statement = self.conn.prepare(sql)?;
        let id = self.allocate_statement_id();
        self.prepared.insert(id, statement);
        Ok(id)
    }

    /// Ids wrap modulo 2^64-1, skipping the sentinel and any id still live.
    fn allocate_statement_id(&mut self) -> u64 {
        loop {
            let id = self.next_statement_id;
            self.next_statement_id = self.next_statement_id.wrapping_add(1);
            if self.next_statement_id == u64::MAX {
                self.next_statement_id = 0;
            }
            if !self.prepared.contains_key(&id) {
                return id;
            }
        }
    }

    fn execute_prepared(
        &mut self,
        statement_id: u64,
        args_json: &str,
    ) -> Result<Box<dyn QueryResultStream>> {
        let statement = self
            .prepared
            .get_mut(&statement_id)
            .ok_or_else(|| DbError::KeyError("no prepared statement found with id".to_string()))?;
        let params = decode_params(args_json)?;
        statement.execute(&params)
    }

    /// Execute a prepared statement and materialize the result.
    pub fn run_prepared_statement(&mut self, statement_id: u64, args_json: &str) -> Result<Vec<u8>> {
        let stream = self.execute_prepared(statement_id, args_json)?;
        self.materialize_query_result(stream)
    }

    /// Execute a prepared statement and stream the result.
    pub fn send_prepared_statement(
        &mut self,
        statement_id: u64,
        args_json: &str,
    ) -> Result<Vec<u8>> {
        self.clear_streaming_state();
        let stream = self.execute_prepared(statement_id, args_json)?;
        self.stream_query_result(stream)
    }

    pub fn close_prepared_statement(&mut self, statement_id: u64) -> Result<()> {
        self.prepared
            .remove(&statement_id)
            .map(|_| ())
            .ok_or_else(|| DbError::KeyError("no prepared statement found with id".to_string()))
    }

    /// Consume a chunk of an Arrow IPC stream. The first call parses the
    /// options; once the stream signals EOS the batches are handed to the
    /// engine as a scan, creating or inserting into the target table. Any
    /// failure clears the partial state.
    pub fn insert_arrow_from_ipc_stream(&mut self, chunk: &[u8], options_json: &str) -> Result<()> {
        if self.arrow_insert.is_none() {
            // Parse the options before touching the stream so partial
            // streams never hold bad options.
            let options = ArrowInsertOptions::read_from(options_json)?;
            self.arrow_insert = Some(ArrowInsertState {
                options,
                stream: IpcStreamBuffer::new(),
            });
        }

        let eos = {
            let state = match self.arrow_insert.as_mut() {
                Some(state) => state,
                None => return Err(DbError::Invalid("arrow insert state missing".to_string())),
            };
            if let Err(err) = state.stream.consume(chunk) {
                self.arrow_insert = None;
                return Err(err);
            }
            state.stream.is_eos()
        };
        if !eos {
            return Ok(());
        }

        // EOS reached: the partial state is taken down in every outcome
        let state = match self.arrow_insert.take() {
            Some(state) => state,
            None => return Err(DbError::Invalid("arrow insert state missing".to_string())),
        };
        let reader = StreamReader::try_new(Cursor::new(state.stream.into_bytes()), None)
            .map_err(|e| DbError::Invalid(format!("invalid arrow ipc stream: {e}")))?;
        let mut relation = self.conn.scan_arrow_stream(Box::new(reader))?;
        if state.options.create_new {
            relation.create(state.options.schema_name(), &state.options.table_name)?;
        } else {
            relation.insert(state.options.schema_name(), &state.options.table_name)?;
        }
        Ok(())
    }

    /// Ingest a CSV file through the engine's `read_csv` table function.
    pub fn insert_csv_from_path(&mut self, path: &str, options_json: &str) -> Result<()> {
        let options = CsvInsertOptions::read_from(options_json)?;

        let mut named = serde_json::Map::new();
        if let Some(header) = options.header {
            named.insert("header".to_string(), header.into());
        }
        if let Some(delimiter) = &options.delimiter {
            named.insert("delim".to_string(), delimiter.clone().into());
        }
        if let Some(escape) = &options.escape {
            named.insert("escape".to_string(), escape.clone().into());
        }
        if let Some(quote) = &options.quote {
            named.insert("quote".to_string(), quote.clone().into());
        }
        if let Some(skip) = options.skip {
            named.insert("skip".to_string(), skip.into());
        }
        if let Some(dateformat) = &options.dateformat {
            named.insert("dateformat".to_string(), dateformat.clone().into());
        }
        if let Some(timestampformat) = &options.timestampformat {
            named.insert("timestampformat".to_string(), timestampformat.clone().into());
        }
        if let Some(columns) = &options.columns {
            let mut column_types = serde_json::Map::new();
            for column in columns {
                column_types.insert(column.name.clone(), column.sql_type.clone().into());
            }
            named.insert("columns".to_string(), column_types.into());
        }
        named.insert("auto_detect".to_string(), options.auto_detect.into());

        let mut relation = self.conn.table_function(
            "read_csv",
            vec![ParamValue::Text(path.to_string())],
            named,
        )?;
        if options.create_new {
            relation.create(options.schema_name(), &options.table_name)?;
        } else {
            relation.insert(options.schema_name(), &options.table_name)?;
        }
        Ok(())
    }

    /// Ingest a JSON file. When the table shape is not known up front an
    /// inference pass runs over a copy of the stream before the real read.
    pub fn insert_json_from_path(&mut self, path: &str, options_json: &str) -> Result<()> {
        let options = JsonInsertOptions::read_from(options_json)?;

        let shape = match (options.needs_inference(), options.table_shape) {
            (false, Some(shape)) => shape,
            _ => {
                let stream = InputFileStream::open(&self.pool, path)?;
                let mut copy = stream.clone();
                infer_table_shape(&mut copy)?
            }
        };
        let format = match shape {
            JsonTableShape::RowArray => "array",
            JsonTableShape::ColumnObject => "columns",
            JsonTableShape::Unrecognized => {
                return Err(DbError::Invalid(format!(
                    "unable to infer the JSON table shape of: {path}"
                )))
            }
        };

        let mut named = serde_json::Map::new();
        named.insert("format".to_string(), format.into());
        if let Some(auto_detect) = options.auto_detect {
            named.insert("auto_detect".to_string(), auto_detect.into());
        }
        if let Some(columns) = &options.columns {
            let mut column_types = serde_json::Map::new();
            for column in columns {
                column_types.insert(column.name.clone(), column.sql_type.clone().into());
            }
            named.insert("columns".to_string(), column_types.into());
        }

        let mut relation = self.conn.table_function(
            "read_json",
            vec![ParamValue::Text(path.to_string())],
            named,
        )?;
        if options.create_new {
            relation.create(options.schema_name(), &options.table_name)?;
        } else {
            relation.insert(options.schema_name(), &options.table_name)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_next_statement_id(&mut self, id: u64) {
        self.next_statement_id = id;
    }
}

/// Decode the argument array of a prepared statement call.
fn decode_params(args_json: &str) -> Result<Vec<ParamValue>> {
    let doc: serde_json::Value = serde_json::from_str(args_json)
        .map_err(|e| DbError::Invalid(format!("invalid arguments: {e}")))?;
    let serde_json::Value::Array(items) = doc else {
        return Err(DbError::Invalid(
            "arguments must be given as array".to_string(),
        ));
    };
    items
        .iter()
        .enumerate()
        .map(|(index, value)| match value {
            serde_json::Value::Number(number) => lossless_double(number)
                .map(ParamValue::Double)
                .ok_or_else(|| {
                    DbError::Invalid(format!("invalid column type for argument {index}"))
                }),
            serde_json::Value::String(text) => Ok(ParamValue::Text(text.clone())),
            serde_json::Value::Bool(flag) => Ok(ParamValue::Bool(*flag)),
            serde_json::Value::Null => Ok(ParamValue::Null),
            _ => Err(DbError::Invalid(format!(
                "invalid column type for argument {index}"
            ))),
        })
        .collect()
}

/// A number is accepted only when double precision represents it exactly.
fn lossless_double(number: &serde_json::Number) -> Option<f64> {
    if let Some(int) = number.as_i64() {
        return (int as f64 as i64 == int).then_some(int as f64);
    }
    if let Some(uint) = number.as_u64() {
        return (uint as f64 as u64 == uint).then_some(uint as f64);
    }
    number.as_f64()
}
