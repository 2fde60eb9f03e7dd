use managed::ManagedSlice;

use super::{Empty, Full};

/// A ring buffer.
///
/// The buffer only hands out slots; element values are written through the
/// reference returned by [enqueue_one](#method.enqueue_one), and read through
/// the one returned by [dequeue_one](#method.dequeue_one).
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is reset.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
        T: Default,
    {
        let mut storage = storage.into();
        for elem in storage.iter_mut() {
            *elem = T::default();
        }
        RingBuffer {
            storage,
            read_at: 0,
            length: 0,
        }
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    fn get_idx(&self, idx: usize) -> usize {
        let len = self.capacity();
        if len > 0 {
            (self.read_at + idx) % len
        } else {
            0
        }
    }

    /// Enqueue a single element into the buffer, and return a reference to it,
    /// or return `Err(Full)` if the buffer is full.
    pub fn enqueue_one(&mut self) -> Result<&mut T, Full> {
        if self.is_full() {
            return Err(Full);
        }
        let index = self.get_idx(self.length);
        self.length += 1;
        Ok(&mut self.storage[index])
    }

    /// Dequeue an element from the buffer, and return a reference to it,
    /// or return `Err(Empty)` if the buffer is empty.
    pub fn dequeue_one(&mut self) -> Result<&mut T, Empty> {
        if self.is_empty() {
            return Err(Empty);
        }
        let next_at = self.get_idx(1);
        let index = self.read_at;
        self.length -= 1;
        self.read_at = if self.is_empty() { 0 } else { next_at };
        Ok(&mut self.storage[index])
    }
}
