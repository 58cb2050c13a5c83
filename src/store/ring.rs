//! Fixed-capacity ring buffer
//!
//! Backs the log store and any other bounded history. Once full, each push
//! overwrites the oldest slot; iteration always yields entries oldest to
//! newest regardless of wrap state.

/// Ring buffer with a fixed capacity set at construction
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the most recently written slot. `None` when empty.
    tail: Option<usize>,
}

impl<T> RingBuffer<T> {
    /// Create a ring buffer holding at most `capacity` entries
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            buf: Vec::with_capacity(capacity),
            capacity,
            tail: None,
        }
    }

    /// Append an entry, overwriting the oldest one once at capacity
    pub fn push(&mut self, item: T) {
        let tail = match self.tail {
            Some(t) if t + 1 >= self.capacity => 0,
            Some(t) => t + 1,
            None => 0,
        };
        if tail == self.buf.len() {
            self.buf.push(item);
        } else {
            self.buf[tail] = item;
        }
        self.tail = Some(tail);
    }

    /// Number of entries currently stored (at most `capacity`)
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all entries and reset the tail cursor
    pub fn clear(&mut self) {
        self.buf.clear();
        self.tail = None;
    }

    /// Iterate entries in chronological order (oldest first)
    ///
    /// When the buffer has wrapped, reads from `tail + 1` through the end,
    /// then from the start through `tail`.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let split = match self.tail {
            Some(t) if self.buf.len() == self.capacity => (t + 1) % self.capacity,
            _ => 0,
        };
        self.buf[split..].iter().chain(self.buf[..split].iter())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Chronologically ordered copy of the contents
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_capacity() {
        let mut ring = RingBuffer::new(3);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_wraparound_keeps_last_capacity_entries() {
        let mut ring = RingBuffer::new(3);
        for v in ["x1", "x2", "x3", "x4"] {
            ring.push(v);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.to_vec(), vec!["x2", "x3", "x4"]);
    }

    #[test]
    fn test_wraparound_many_times() {
        let mut ring = RingBuffer::new(5);
        for v in 0..23 {
            ring.push(v);
        }
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.to_vec(), vec![18, 19, 20, 21, 22]);
    }

    #[test]
    fn test_exact_capacity_is_in_order() {
        let mut ring = RingBuffer::new(4);
        for v in 0..4 {
            ring.push(v);
        }
        assert_eq!(ring.to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_clear_resets() {
        let mut ring = RingBuffer::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.to_vec(), Vec::<i32>::new());
        ring.push(9);
        assert_eq!(ring.to_vec(), vec![9]);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::<u8>::new(0);
    }
}
