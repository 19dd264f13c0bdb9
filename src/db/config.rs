//! Database configuration

use serde::{Deserialize, Serialize};

use crate::{DbError, Result};

/// Filesystem-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Let hosts without range support copy HTTP files fully into memory
    pub allow_full_http_reads: bool,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            allow_full_http_reads: true,
        }
    }
}

/// The `Open` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path; empty or ":memory:" selects writable in-memory mode,
    /// anything else is opened read-only
    pub path: String,
    pub maximum_threads: u32,
    /// When false, 64-bit integer columns are rewritten to double precision
    /// before result serialization
    pub emit_bigint: bool,
    pub filesystem: FilesystemConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            maximum_threads: 1,
            emit_bigint: true,
            filesystem: FilesystemConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Parse the JSON payload; an empty payload selects the defaults.
    pub fn read_from(args_json: &str) -> Result<Self> {
        if args_json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(args_json)
            .map_err(|e| DbError::Invalid(format!("invalid database config: {e}")))
    }

    pub fn in_memory(&self) -> bool {
        self.path.is_empty() || self.path == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::read_from("").unwrap();
        assert!(config.in_memory());
        assert!(config.emit_bigint);
        assert_eq!(config.maximum_threads, 1);
        assert!(config.filesystem.allow_full_http_reads);
    }

    #[test]
    fn test_parse_full_payload() {
        let config = DatabaseConfig::read_from(
            r#"{
                "path": "/data/analytics.db",
                "maximum_threads": 4,
                "emit_bigint": false,
                "filesystem": { "allow_full_http_reads": false }
            }"#,
        )
        .unwrap();
        assert!(!config.in_memory());
        assert_eq!(config.maximum_threads, 4);
        assert!(!config.emit_bigint);
        assert!(!config.filesystem.allow_full_http_reads);
    }

    #[test]
    fn test_memory_path_is_in_memory() {
        let config = DatabaseConfig::read_from(r#"{"path": ":memory:"}"#).unwrap();
        assert!(config.in_memory());
    }

    #[test]
    fn test_bad_json_is_invalid() {
        assert!(matches!(
            DatabaseConfig::read_from("{nope"),
            Err(DbError::Invalid(_))
        ));
    }
}
