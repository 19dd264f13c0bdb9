//! Buffered input stream
//!
//! `std::io::Read` view of a paged file, used by the ingest paths that run
//! an inference pass over a stream prefix before the real read. Cloning
//! duplicates the stream including its position.

use std::io::Read;

use super::{FilePageBuffer, PageFileRef};
use crate::vfs::OpenFlags;
use crate::Result;
use std::sync::Arc;

pub struct InputFileStream {
    file: PageFileRef,
    position: u64,
}

impl InputFileStream {
    pub fn open(pool: &Arc<FilePageBuffer>, path: &str) -> Result<Self> {
        let file = pool.open_file(path, OpenFlags::read())?;
        Ok(Self { file, position: 0 })
    }

    pub fn file_size(&self) -> u64 {
        self.file.file_size()
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Clone for InputFileStream {
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            position: self.position,
        }
    }
}

impl Read for InputFileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .file
            .read(buf, self.position)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.position += n as u64;
        Ok(n)
    }
}
