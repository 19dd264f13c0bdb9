//! Ingest option structs
//!
//! Parsed from the JSON payloads of the Arrow/CSV/JSON insert calls. The
//! ingest formats themselves belong to the engine; this core only validates
//! the options and routes them.

use serde::Deserialize;

use crate::{DbError, Result};

/// A column with an explicit SQL type
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
}

/// Options of `insert_arrow_from_ipc_stream`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArrowInsertOptions {
    pub schema_name: String,
    pub table_name: String,
    pub create_new: bool,
}

impl ArrowInsertOptions {
    pub fn read_from(options_json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(options_json)
            .map_err(|e| DbError::Invalid(format!("invalid insert options: {e}")))?;
        if options.table_name.is_empty() {
            return Err(DbError::Invalid("missing 'name' option".to_string()));
        }
        Ok(options)
    }

    pub fn schema_name(&self) -> &str {
        if self.schema_name.is_empty() {
            "main"
        } else {
            &self.schema_name
        }
    }
}

/// Options of `insert_csv_from_path`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsvInsertOptions {
    pub schema_name: String,
    pub table_name: String,
    pub create_new: bool,
    pub header: Option<bool>,
    pub delimiter: Option<String>,
    pub escape: Option<String>,
    pub quote: Option<String>,
    pub skip: Option<i64>,
    pub dateformat: Option<String>,
    pub timestampformat: Option<String>,
    pub columns: Option<Vec<ColumnSpec>>,
    pub auto_detect: bool,
}

impl Default for CsvInsertOptions {
    fn default() -> Self {
        Self {
            schema_name: String::new(),
            table_name: String::new(),
            create_new: true,
            header: None,
            delimiter: None,
            escape: None,
            quote: None,
            skip: None,
            dateformat: None,
            timestampformat: None,
            columns: None,
            auto_detect: true,
        }
    }
}

impl CsvInsertOptions {
    pub fn read_from(options_json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(options_json)
            .map_err(|e| DbError::Invalid(format!("invalid insert options: {e}")))?;
        if options.table_name.is_empty() {
            return Err(DbError::Invalid("missing 'name' option".to_string()));
        }
        Ok(options)
    }

    pub fn schema_name(&self) -> &str {
        if self.schema_name.is_empty() {
            "main"
        } else {
            &self.schema_name
        }
    }
}

/// Shape of a JSON document holding a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonTableShape {
    /// `[{"a": 1, "b": 2}, ...]`
    RowArray,
    /// `{"a": [1, ...], "b": [2, ...]}`
    ColumnObject,
    Unrecognized,
}

impl<'de> serde::Deserialize<'de> for JsonTableShape {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Ok(match text.as_str() {
            "row-array" => JsonTableShape::RowArray,
            "column-object" => JsonTableShape::ColumnObject,
            _ => JsonTableShape::Unrecognized,
        })
    }
}

/// Options of `insert_json_from_path`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsonInsertOptions {
    pub schema_name: String,
    pub table_name: String,
    pub create_new: bool,
    pub table_shape: Option<JsonTableShape>,
    pub auto_detect: Option<bool>,
    pub columns: Option<Vec<ColumnSpec>>,
}

impl Default for JsonInsertOptions {
    fn default() -> Self {
        Self {
            schema_name: String::new(),
            table_name: String::new(),
            create_new: true,
            table_shape: None,
            auto_detect: None,
            columns: None,
        }
    }
}

impl JsonInsertOptions {
    pub fn read_from(options_json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(options_json)
            .map_err(|e| DbError::Invalid(format!("invalid insert options: {e}")))?;
        if options.table_name.is_empty() {
            return Err(DbError::Invalid("missing 'name' option".to_string()));
        }
        Ok(options)
    }

    pub fn schema_name(&self) -> &str {
        if self.schema_name.is_empty() {
            "main"
        } else {
            &self.schema_name
        }
    }

    /// The shape must be inferred when it is absent, unrecognized, or
    /// auto-detection is requested.
    pub fn needs_inference(&self) -> bool {
        self.table_shape.is_none()
            || self.table_shape == Some(JsonTableShape::Unrecognized)
            || self.auto_detect.unwrap_or(false)
    }
}

/// Detect the table shape from the first structural byte of the stream.
pub fn infer_table_shape(reader: &mut dyn std::io::Read) -> Result<JsonTableShape> {
    let mut byte = [0u8; 1];
    loop {
        let n = reader
            .read(&mut byte)
            .map_err(|e| DbError::Io(e.to_string()))?;
        if n == 0 {
            return Ok(JsonTableShape::Unrecognized);
        }
        match byte[0] {
            b' ' | b'\t' | b'\r' | b'\n' => continue,
            b'[' => return Ok(JsonTableShape::RowArray),
            b'{' => return Ok(JsonTableShape::ColumnObject),
            _ => return Ok(JsonTableShape::Unrecognized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_options() {
        let options =
            ArrowInsertOptions::read_from(r#"{"table_name": "t", "create_new": true}"#).unwrap();
        assert_eq!(options.table_name, "t");
        assert_eq!(options.schema_name(), "main");
        assert!(options.create_new);

        let err = ArrowInsertOptions::read_from(r#"{"schema_name": "s"}"#).unwrap_err();
        assert!(matches!(err, DbError::Invalid(msg) if msg == "missing 'name' option"));
    }

    #[test]
    fn test_csv_options() {
        let options = CsvInsertOptions::read_from(
            r#"{
                "table_name": "T",
                "header": true,
                "delimiter": "|",
                "skip": 2,
                "columns": [{"name": "a", "type": "INTEGER"}]
            }"#,
        )
        .unwrap();
        assert_eq!(options.header, Some(true));
        assert_eq!(options.delimiter.as_deref(), Some("|"));
        assert_eq!(options.skip, Some(2));
        assert!(options.auto_detect);
        assert_eq!(
            options.columns.as_deref(),
            Some(
                &[ColumnSpec {
                    name: "a".to_string(),
                    sql_type: "INTEGER".to_string()
                }][..]
            )
        );
    }

    #[test]
    fn test_json_options_and_shapes() {
        let options = JsonInsertOptions::read_from(
            r#"{"table_name": "j", "table_shape": "row-array"}"#,
        )
        .unwrap();
        assert_eq!(options.table_shape, Some(JsonTableShape::RowArray));
        assert!(!options.needs_inference());

        let options =
            JsonInsertOptions::read_from(r#"{"table_name": "j", "auto_detect": true}"#).unwrap();
        assert!(options.needs_inference());
    }

    #[test]
    fn test_shape_inference() {
        let mut row = std::io::Cursor::new(b"  \n [{\"a\": 1}]".to_vec());
        assert_eq!(
            infer_table_shape(&mut row).unwrap(),
            JsonTableShape::RowArray
        );

        let mut col = std::io::Cursor::new(b"{\"a\": [1]}".to_vec());
        assert_eq!(
            infer_table_shape(&mut col).unwrap(),
            JsonTableShape::ColumnObject
        );

        let mut other = std::io::Cursor::new(b"42".to_vec());
        assert_eq!(
            infer_table_shape(&mut other).unwrap(),
            JsonTableShape::Unrecognized
        );

        let mut empty = std::io::Cursor::new(Vec::new());
        assert_eq!(
            infer_table_shape(&mut empty).unwrap(),
            JsonTableShape::Unrecognized
        );
    }
}
