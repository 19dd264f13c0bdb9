//! File access statistics
//!
//! Per-file page histograms distinguishing cold reads (paid for with host
//! I/O), cached reads (served from a buffer or read-ahead window) and
//! writes. Collectors are enabled per path and survive re-opens of the file.

use std::io::Write;
use std::sync::Arc;

use ahash::AHashMap;
use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::Mutex;

use crate::buffer::PAGE_SIZE;
use crate::{DbError, Result};

/// Magic bytes of the binary statistics export
const EXPORT_MAGIC: [u8; 4] = *b"FPST";
/// Export layout version
const EXPORT_VERSION: u16 = 1;

/// Per-page access counters for one file
pub struct FileStatisticsCollector {
    state: Mutex<CollectorState>,
}

struct CollectorState {
    reads_cold: Vec<u32>,
    reads_cached: Vec<u32>,
    writes: Vec<u32>,
}

impl FileStatisticsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState {
                reads_cold: Vec::new(),
                reads_cached: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// Reshape the histograms for a new file size. Counts of pages that
    /// remain in range are preserved.
    pub fn resize(&self, file_size: u64) {
        let pages = file_size.div_ceil(PAGE_SIZE as u64) as usize;
        let mut state = self.state.lock();
        state.reads_cold.resize(pages, 0);
        state.reads_cached.resize(pages, 0);
        state.writes.resize(pages, 0);
    }

    pub fn register_read_cold(&self, offset: u64, length: usize) {
        self.register(offset, length, Counter::Cold);
    }

    pub fn register_read_cached(&self, offset: u64, length: usize) {
        self.register(offset, length, Counter::Cached);
    }

    pub fn register_write(&self, offset: u64, length: usize) {
        self.register(offset, length, Counter::Write);
    }

    fn register(&self, offset: u64, length: usize, counter: Counter) {
        if length == 0 {
            return;
        }
        let first = (offset / PAGE_SIZE as u64) as usize;
        let last = ((offset + length as u64 - 1) / PAGE_SIZE as u64) as usize;
        let mut state = self.state.lock();
        let pages = match counter {
            Counter::Cold => &mut state.reads_cold,
            Counter::Cached => &mut state.reads_cached,
            Counter::Write => &mut state.writes,
        };
        if first >= pages.len() {
            return;
        }
        let last = last.min(pages.len() - 1);
        for page in first..=last {
            pages[page] = pages[page].saturating_add(1);
        }
    }

    /// Number of pages currently tracked
    pub fn page_count(&self) -> usize {
        self.state.lock().reads_cold.len()
    }

    /// Sum of counters over all pages as (cold, cached, writes)
    pub fn totals(&self) -> (u64, u64, u64) {
        let state = self.state.lock();
        let sum = |v: &Vec<u32>| v.iter().map(|&c| c as u64).sum();
        (
            sum(&state.reads_cold),
            sum(&state.reads_cached),
            sum(&state.writes),
        )
    }

    /// Serialize as `magic || version || page_size || n_pages || triples`,
    /// all little-endian.
    pub fn export(&self) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let pages = state.reads_cold.len();
        let mut out = Vec::with_capacity(18 + pages * 12);
        out.write_all(&EXPORT_MAGIC)?;
        out.write_u16::<LittleEndian>(EXPORT_VERSION)?;
        out.write_u32::<LittleEndian>(PAGE_SIZE as u32)?;
        out.write_u64::<LittleEndian>(pages as u64)?;
        for page in 0..pages {
            out.write_u32::<LittleEndian>(state.reads_cold[page])?;
            out.write_u32::<LittleEndian>(state.reads_cached[page])?;
            out.write_u32::<LittleEndian>(state.writes[page])?;
        }
        Ok(out)
    }
}

impl Default for FileStatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

enum Counter {
    Cold,
    Cached,
    Write,
}

/// Registry of enabled collectors, keyed by file path
pub struct FileStatisticsRegistry {
    collectors: Mutex<AHashMap<String, Arc<FileStatisticsCollector>>>,
}

impl FileStatisticsRegistry {
    pub fn new() -> Self {
        Self {
            collectors: Mutex::new(AHashMap::new()),
        }
    }

    /// Enable or disable collection for a path. Idempotent; returns the
    /// (new or existing) collector when enabling, None when disabling.
    pub fn enable_collector(
        &self,
        path: &str,
        enable: bool,
    ) -> Option<Arc<FileStatisticsCollector>> {
        let mut collectors = self.collectors.lock();
        if !enable {
            collectors.remove(path);
            return None;
        }
        Some(
            collectors
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(FileStatisticsCollector::new()))
                .clone(),
        )
    }

    pub fn find_collector(&self, path: &str) -> Option<Arc<FileStatisticsCollector>> {
        self.collectors.lock().get(path).cloned()
    }

    pub fn export_statistics(&self, path: &str) -> Result<Vec<u8>> {
        let collector = self
            .find_collector(path)
            .ok_or_else(|| DbError::Invalid(format!("no statistics collected for: {path}")))?;
        collector.export()
    }
}

impl Default for FileStatisticsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Read;

    #[test]
    fn test_counters_by_page() {
        let collector = FileStatisticsCollector::new();
        collector.resize(3 * PAGE_SIZE as u64);

        // One read spanning pages 0..=1, one write on page 2
        collector.register_read_cold(100, PAGE_SIZE);
        collector.register_write(2 * PAGE_SIZE as u64, 10);
        collector.register_read_cached(0, 1);

        let (cold, cached, writes) = collector.totals();
        assert_eq!(cold, 2);
        assert_eq!(cached, 1);
        assert_eq!(writes, 1);
    }

    #[test]
    fn test_resize_preserves_in_range_counts() {
        let collector = FileStatisticsCollector::new();
        collector.resize(4 * PAGE_SIZE as u64);
        collector.register_read_cold(0, 1);
        collector.register_read_cold(3 * PAGE_SIZE as u64, 1);

        collector.resize(PAGE_SIZE as u64);
        assert_eq!(collector.page_count(), 1);
        let (cold, _, _) = collector.totals();
        assert_eq!(cold, 1);

        // Growing back exposes zeroed pages
        collector.resize(4 * PAGE_SIZE as u64);
        let (cold, _, _) = collector.totals();
        assert_eq!(cold, 1);
    }

    #[test]
    fn test_export_layout() {
        let registry = FileStatisticsRegistry::new();
        let collector = registry.enable_collector("a.parquet", true).unwrap();
        collector.resize(2 * PAGE_SIZE as u64);
        collector.register_read_cold(0, 1);
        collector.register_write(PAGE_SIZE as u64, 1);

        let bytes = registry.export_statistics("a.parquet").unwrap();
        let mut cursor = std::io::Cursor::new(&bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"FPST");
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 1);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), PAGE_SIZE as u32);
        assert_eq!(cursor.read_u64::<LittleEndian>().unwrap(), 2);
        // Page 0: one cold read
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 1);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0);
        // Page 1: one write
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 1);
    }

    #[test]
    fn test_enable_is_idempotent() {
        let registry = FileStatisticsRegistry::new();
        let a = registry.enable_collector("x", true).unwrap();
        let b = registry.enable_collector("x", true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(registry.enable_collector("x", false).is_none());
        assert!(registry.find_collector("x").is_none());
        assert!(registry.export_statistics("x").is_err());
    }
}
