//! Per-entry memory buffer.
//!
//! Capacity is the number of bytes reserved (and billed against the budget);
//! `len` is the number of valid bytes. Resizing always reallocates and copies,
//! so the reserved amount never differs from the slice length.

/// Owned, fixed-capacity byte buffer of one storage entry.
#[derive(Default)]
pub struct MemoryBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::default(),
            len: 0,
        }
    }

    /// Reserved bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free room before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.data.len()
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Append as much of `bytes` as fits; returns how many were taken.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }

    /// Copy valid bytes starting at `offset` into `out`; returns how many were copied.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let n = out.len().min(self.len - offset);
        out[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    /// Forget the content; capacity (and its billing) is untouched.
    pub fn discard(&mut self) {
        self.len = 0;
    }

    /// Replace the storage with a fresh allocation of `new_capacity` bytes,
    /// keeping the valid prefix. Only the budget tracker calls this.
    pub(crate) fn reallocate(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity >= self.len);
        let keep = self.len.min(new_capacity);
        let mut next = vec![0u8; new_capacity].into_boxed_slice();
        next[..keep].copy_from_slice(&self.data[..keep]);
        self.data = next;
        self.len = keep;
    }
}

impl std::fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}
