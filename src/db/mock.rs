//! Mock engine for facade and connection tests
//!
//! Implements the engine contract with a handful of canned queries and a
//! shared call log, enough to exercise marshalling, streaming, prepared
//! statements and the ingest routing without a SQL implementation.

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use parking_lot::Mutex;

use crate::buffer::BufferedFileSystem;
use crate::engine::{
    Engine, EngineConnection, EngineDatabase, EngineOptions, EnginePreparedStatement, ParamValue,
    QueryResultStream, TableRelation, TokenizedScript,
};
use crate::{DbError, Result};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct MockEngine {
    calls: CallLog,
}

impl MockEngine {
    pub fn new() -> (Box<dyn Engine>, CallLog) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        (Box::new(Self { calls: calls.clone() }), calls)
    }
}

impl Engine for MockEngine {
    fn open(
        &self,
        options: &EngineOptions,
        _filesystem: Arc<BufferedFileSystem>,
    ) -> Result<Box<dyn EngineDatabase>> {
        self.calls.lock().push(format!(
            "open:path={},read_only={}",
            options.path, options.read_only
        ));
        Ok(Box::new(MockDatabase {
            calls: self.calls.clone(),
        }))
    }
}

struct MockDatabase {
    calls: CallLog,
}

impl EngineDatabase for MockDatabase {
    fn connect(&self) -> Result<Box<dyn EngineConnection>> {
        Ok(Box::new(MockConnection {
            calls: self.calls.clone(),
        }))
    }

    fn load_extension(&self, name: &str) -> Result<()> {
        self.calls.lock().push(format!("load_extension:{name}"));
        Ok(())
    }

    fn version(&self) -> String {
        "mock-engine v1.0.0".to_string()
    }

    fn tokenize(&self, text: &str) -> TokenizedScript {
        let mut tokens = TokenizedScript::default();
        let mut in_token = false;
        for (offset, c) in text.char_indices() {
            if c.is_whitespace() {
                in_token = false;
            } else if !in_token {
                tokens.offsets.push(offset as u32);
                tokens.types.push(u8::from(c.is_ascii_digit()));
                in_token = true;
            }
        }
        tokens
    }
}

struct MockConnection {
    calls: CallLog,
}

impl EngineConnection for MockConnection {
    fn send_query(&mut self, sql: &str) -> Result<Box<dyn QueryResultStream>> {
        self.calls.lock().push(format!("query:{sql}"));
        if sql == "SELECT 42" {
            let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![Arc::new(Int32Array::from(vec![42])) as ArrayRef],
            )?;
            return Ok(Box::new(BatchStream::new(schema, vec![batch])));
        }
        if sql == "SELECT BIGINTS" {
            let schema = Arc::new(Schema::new(vec![Field::new("big", DataType::Int64, false)]));
            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![Arc::new(Int64Array::from(vec![1i64 << 31, (1i64 << 54) + 1])) as ArrayRef],
            )?;
            return Ok(Box::new(BatchStream::new(schema, vec![batch])));
        }
        if let Some(rest) = sql.strip_prefix("RANGE ") {
            let end: i64 = rest
                .trim()
                .parse()
                .map_err(|_| DbError::Execution(format!("bad range bound: {rest}")))?;
            let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
            return Ok(Box::new(RangeStream {
                schema,
                next: 0,
                end,
            }));
        }
        Err(DbError::Execution(format!("unrecognized query: {sql}")))
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn EnginePreparedStatement>> {
        if sql.contains("FAIL") {
            return Err(DbError::Execution(format!("cannot prepare: {sql}")));
        }
        self.calls.lock().push(format!("prepare:{sql}"));
        Ok(Box::new(MockPrepared {
            calls: self.calls.clone(),
        }))
    }

    fn table_function(
        &mut self,
        name: &str,
        args: Vec<ParamValue>,
        named_args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Box<dyn TableRelation>> {
        let named = serde_json::Value::Object(named_args);
        self.calls
            .lock()
            .push(format!("table_function:{name}:{args:?}:{named}"));
        Ok(Box::new(MockRelation {
            calls: self.calls.clone(),
        }))
    }

    fn scan_arrow_stream(
        &mut self,
        reader: Box<dyn RecordBatchReader + Send>,
    ) -> Result<Box<dyn TableRelation>> {
        let mut rows = 0;
        let mut batches = 0;
        for batch in reader {
            rows += batch?.num_rows();
            batches += 1;
        }
        self.calls
            .lock()
            .push(format!("scan_arrow:rows={rows},batches={batches}"));
        Ok(Box::new(MockRelation {
            calls: self.calls.clone(),
        }))
    }
}

struct MockPrepared {
    calls: CallLog,
}

impl EnginePreparedStatement for MockPrepared {
    /// Sums its numeric arguments into a single-row result.
    fn execute(&mut self, params: &[ParamValue]) -> Result<Box<dyn QueryResultStream>> {
        self.calls.lock().push(format!("execute:{params:?}"));
        let mut sum = 0.0;
        for param in params {
            match param {
                ParamValue::Double(v) => sum += v,
                ParamValue::Null => {}
                other => {
                    return Err(DbError::Execution(format!(
                        "mock statement takes numbers, got {other:?}"
                    )))
                }
            }
        }
        let schema = Arc::new(Schema::new(vec![Field::new(
            "sum",
            DataType::Float64,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Float64Array::from(vec![sum])) as ArrayRef],
        )?;
        Ok(Box::new(BatchStream::new(schema, vec![batch])))
    }
}

struct MockRelation {
    calls: CallLog,
}

impl TableRelation for MockRelation {
    fn create(&mut self, schema_name: &str, table_name: &str) -> Result<()> {
        self.calls
            .lock()
            .push(format!("create:{schema_name}.{table_name}"));
        Ok(())
    }

    fn insert(&mut self, schema_name: &str, table_name: &str) -> Result<()> {
        self.calls
            .lock()
            .push(format!("insert:{schema_name}.{table_name}"));
        Ok(())
    }
}

/// Result stream over pre-built batches
struct BatchStream {
    schema: SchemaRef,
    batches: VecDeque<RecordBatch>,
}

impl BatchStream {
    fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            batches: batches.into(),
        }
    }
}

impl QueryResultStream for BatchStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn fetch(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.batches.pop_front())
    }
}

/// Lazily produced integer range, 2048 rows per batch
struct RangeStream {
    schema: SchemaRef,
    next: i64,
    end: i64,
}

impl QueryResultStream for RangeStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn fetch(&mut self) -> Result<Option<RecordBatch>> {
        if self.next >= self.end {
            return Ok(None);
        }
        let upper = (self.next + 2048).min(self.end);
        let values: Vec<i64> = (self.next..upper).collect();
        self.next = upper;
        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![Arc::new(Int64Array::from(values)) as ArrayRef],
        )?;
        Ok(Some(batch))
    }
}
