//! Per-thread sequential read-ahead
//!
//! Non-buffered protocols pay a host round trip per read; a thread that
//! scans a file sequentially amortizes that by fetching a window ahead of
//! the request. Each thread owns one window per filesystem, replaced
//! whenever a request misses it and invalidated by writes and truncations.

use parking_lot::Mutex;

use crate::runtime::{HostError, HostResult};
use crate::stats::FileStatisticsCollector;

/// Minimum bytes fetched per window refill
pub const READAHEAD_MIN: usize = 32 * 1024;

/// One cached window of a single file
pub struct ReadAheadBuffer {
    window: Mutex<Window>,
}

#[derive(Default)]
struct Window {
    file_id: Option<u32>,
    offset: u64,
    data: Vec<u8>,
}

impl ReadAheadBuffer {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window::default()),
        }
    }

    /// Serve a read at `offset`, refilling the window on a miss.
    ///
    /// `fetch(buf, offset)` performs the host read. Short reads are allowed;
    /// a refill stops when the host returns 0.
    pub fn read(
        &self,
        file_id: u32,
        file_size: u64,
        out: &mut [u8],
        offset: u64,
        fetch: &mut dyn FnMut(&mut [u8], u64) -> HostResult<usize>,
        stats: Option<&FileStatisticsCollector>,
    ) -> HostResult<usize> {
        if out.is_empty() || offset >= file_size {
            return Ok(0);
        }
        let mut window = self.window.lock();

        // Hit inside the cached window?
        if window.file_id == Some(file_id)
            && offset >= window.offset
            && offset < window.offset + window.data.len() as u64
        {
            let start = (offset - window.offset) as usize;
            let n = out.len().min(window.data.len() - start);
            out[..n].copy_from_slice(&window.data[start..start + n]);
            if let Some(stats) = stats {
                stats.register_read_cached(offset, n);
            }
            return Ok(n);
        }

        // Refill: fetch max(len, READAHEAD_MIN), capped to the file end
        let want = out.len().max(READAHEAD_MIN).min((file_size - offset) as usize);
        let mut data = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = match fetch(&mut data[filled..], offset + filled as u64) {
                Ok(n) => n,
                Err(err) => {
                    // A failed refill degrades to a direct host read
                    if filled == 0 {
                        drop(window);
                        return self.read_direct(out, offset, fetch, stats, err);
                    }
                    break;
                }
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        if let Some(stats) = stats {
            stats.register_read_cold(offset, filled);
        }

        let n = out.len().min(filled);
        out[..n].copy_from_slice(&data[..n]);
        *window = Window {
            file_id: Some(file_id),
            offset,
            data,
        };
        Ok(n)
    }

    fn read_direct(
        &self,
        out: &mut [u8],
        offset: u64,
        fetch: &mut dyn FnMut(&mut [u8], u64) -> HostResult<usize>,
        stats: Option<&FileStatisticsCollector>,
        refill_err: HostError,
    ) -> HostResult<usize> {
        log::debug!("readahead refill failed ({refill_err}), falling back to direct read");
        let n = fetch(out, offset)?;
        if let Some(stats) = stats {
            stats.register_read_cold(offset, n);
        }
        Ok(n)
    }

    /// Drop the window if it belongs to the given file.
    pub fn invalidate(&self, file_id: u32) {
        let mut window = self.window.lock();
        if window.file_id == Some(file_id) {
            *window = Window::default();
        }
    }
}

impl Default for ReadAheadBuffer {
    fn default() -> Self {
        Self::new()
    }
}
