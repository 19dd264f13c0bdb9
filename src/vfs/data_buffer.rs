//! Growable owned byte region backing in-memory files

/// Contiguous owned buffer with exponential growth and shrinking
/// reallocation. Never shared: ownership moves into a file record when the
/// buffer becomes file content.
#[derive(Debug, Default)]
pub struct DataBuffer {
    /// Backing allocation; length is the capacity
    data: Vec<u8>,
    /// Logical size, <= data.len()
    size: usize,
}

impl DataBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            size: 0,
        }
    }

    /// Take ownership of existing bytes; capacity starts at the byte count.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let size = data.len();
        Self { data, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self) -> &[u8] {
        &self.data[..self.size]
    }

    pub fn get_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.size]
    }

    /// Resize to `n` bytes. Growth reallocates to `max(2.25 * capacity, n)`;
    /// shrinking below half the capacity reallocates down to `n`.
    pub fn resize(&mut self, n: usize) {
        let capacity = self.data.len();
        if n > capacity {
            let new_capacity = (capacity * 2 + capacity / 4).max(n);
            let mut next = vec![0u8; new_capacity];
            next[..self.size].copy_from_slice(&self.data[..self.size]);
            self.data = next;
        } else if n < capacity / 2 {
            let mut next = vec![0u8; n];
            next.copy_from_slice(&self.data[..n]);
            self.data = next;
        }
        self.size = n;
    }
}
