//! Power-of-two circular byte buffer.
//!
//! Indices run freely and wrap at `usize::MAX`; the slot is `index & MASK`.
//! `head - tail` is therefore always the fill level, and a full buffer is
//! distinguishable from an empty one without sacrificing a byte.

/// Fixed-capacity byte FIFO.  `N` must be a power of two.
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    /// Producer index (next write).
    head: usize,
    /// Consumer index (next read).
    tail: usize,
}

impl<const N: usize> RingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "ring buffer size must be a power of two");
        N - 1
    };

    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            buf: [0; N],
            head: 0,
            tail: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn free(&self) -> usize {
        N - self.len()
    }

    /// Append as much of `data` as fits.  Returns the number of bytes
    /// stored; the remainder is the caller's to count as dropped.
    pub fn put(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        let start = self.head & Self::MASK;
        let first = n.min(N - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.head = self.head.wrapping_add(n);
        n
    }

    /// Remove up to `out.len()` bytes.  Returns the number copied.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len());
        let start = self.tail & Self::MASK;
        let first = n.min(N - start);
        out[..first].copy_from_slice(&self.buf[start..start + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.tail = self.tail.wrapping_add(n);
        n
    }

    pub fn clear(&mut self) {
        self.tail = self.head;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
