//! Packet buffers and the pool that backs them.
//!
//! A [`PacketBuffer`] is a move-only descriptor over a fixed-size region
//! taken from a [`PacketPool`]. The valid bytes sit between the `prepend`
//! and `append` offsets:
//!
//! ```text
//! |<-- headroom -->|<-- payload (prepend..append) -->|<-- tailroom -->|
//! data_start    prepend                          append         data_end
//! ```
//!
//! Dropping a buffer gives its region back to the pool it came from, so a
//! buffer is released exactly once whichever path lets go of it.

use core::{fmt, mem};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::storage::{Empty, Full};
use crate::wire::IPV4_HEADER_LEN;

/// Error returned when allocating from an exhausted pool.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PoolEmpty;

impl fmt::Display for PoolEmpty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "packet pool empty")
    }
}

impl std::error::Error for PoolEmpty {}

/// Pool counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of buffers the pool was created with.
    pub total: usize,
    /// Number of buffers currently available.
    pub free: usize,
    pub allocated: u64,
    pub released: u64,
    /// Allocation requests that found the pool empty.
    pub empty_requests: u64,
}

#[derive(Debug)]
struct PoolInner {
    free: Vec<Box<[u8]>>,
    stats: PoolStats,
}

/// A fixed-size pool of packet regions.
#[derive(Debug)]
pub struct PacketPool {
    payload_size: usize,
    inner: Mutex<PoolInner>,
}

impl PacketPool {
    /// Create a pool of `count` regions of `payload_size` bytes each.
    pub fn new(count: usize, payload_size: usize) -> Arc<PacketPool> {
        let free = (0..count)
            .map(|_| vec![0u8; payload_size].into_boxed_slice())
            .collect();
        Arc::new(PacketPool {
            payload_size,
            inner: Mutex::new(PoolInner {
                free,
                stats: PoolStats {
                    total: count,
                    free: count,
                    ..PoolStats::default()
                },
            }),
        })
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a buffer from the pool with `reserve` bytes of headroom.
    ///
    /// The headroom is clamped to the region size.
    pub fn allocate(self: &Arc<Self>, reserve: usize) -> Result<PacketBuffer, PoolEmpty> {
        let mut inner = self.lock();
        let Some(data) = inner.free.pop() else {
            inner.stats.empty_requests += 1;
            return Err(PoolEmpty);
        };
        inner.stats.allocated += 1;
        inner.stats.free = inner.free.len();
        drop(inner);

        let reserve = reserve.min(data.len());
        Ok(PacketBuffer {
            pool: Arc::clone(self),
            data,
            prepend: reserve,
            append: reserve,
        })
    }

    /// Give a buffer back to the pool that owns it.
    ///
    /// Equivalent to dropping `pkbuf`.
    pub fn release(&self, pkbuf: PacketBuffer) {
        drop(pkbuf)
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    fn give_back(&self, mut data: Box<[u8]>) {
        data.fill(0);
        let mut inner = self.lock();
        inner.free.push(data);
        inner.stats.released += 1;
        inner.stats.free = inner.free.len();
    }
}

/// A packet descriptor borrowed from a [`PacketPool`].
pub struct PacketBuffer {
    pool: Arc<PacketPool>,
    data: Box<[u8]>,
    prepend: usize,
    append: usize,
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        let data = mem::take(&mut self.data);
        self.pool.give_back(data);
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("data_end", &self.data_end())
            .field("prepend", &self.prepend)
            .field("append", &self.append)
            .finish()
    }
}

impl PacketBuffer {
    pub const fn data_start(&self) -> usize {
        0
    }

    pub fn data_end(&self) -> usize {
        self.data.len()
    }

    /// Offset of the first valid byte.
    pub const fn prepend(&self) -> usize {
        self.prepend
    }

    /// Offset one past the last valid byte.
    pub const fn append(&self) -> usize {
        self.append
    }

    pub fn len(&self) -> usize {
        self.append.saturating_sub(self.prepend)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the valid bytes, or an empty slice if the window is out of bounds.
    pub fn payload(&self) -> &[u8] {
        self.data.get(self.prepend..self.append).unwrap_or(&[])
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.data
            .get_mut(self.prepend..self.append)
            .unwrap_or(&mut [])
    }

    /// The IPv4 header sitting right behind `prepend`, once it has been pulled.
    pub fn ip_header(&self) -> Option<&[u8]> {
        let start = self.prepend.checked_sub(IPV4_HEADER_LEN)?;
        self.data.get(start..self.prepend)
    }

    /// Copy `bytes` to the end of the payload.
    pub fn append_data(&mut self, bytes: &[u8]) -> Result<(), Full> {
        let end = self.append.checked_add(bytes.len()).ok_or(Full)?;
        if self.prepend > self.append || end > self.data_end() {
            return Err(Full);
        }
        self.data[self.append..end].copy_from_slice(bytes);
        self.append = end;
        Ok(())
    }

    /// Grow the payload `len` bytes towards `data_start` and return the new front.
    pub fn push_header(&mut self, len: usize) -> Result<&mut [u8], Full> {
        if len > self.prepend || self.prepend > self.append || self.append > self.data_end() {
            return Err(Full);
        }
        self.prepend -= len;
        Ok(&mut self.data[self.prepend..self.prepend + len])
    }

    /// Consume `len` bytes from the front of the payload.
    pub fn pull_header(&mut self, len: usize) -> Result<(), Empty> {
        if len > self.len() {
            return Err(Empty);
        }
        self.prepend += len;
        Ok(())
    }

    /// Shorten the payload to at most `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.append = self.prepend + len;
        }
    }

    /// Overwrite the window offsets without any check.
    ///
    /// Models descriptor corruption by a misbehaving driver; the receive
    /// path must cope with whatever ends up here.
    #[doc(hidden)]
    pub fn set_window_unchecked(&mut self, prepend: usize, append: usize) {
        self.prepend = prepend;
        self.append = append;
    }

    /// Check that a `header_len` header fits behind `prepend` and that
    /// `append` does not run past the region.
    pub fn check_window(&self, header_len: usize) -> bool {
        let front_ok = self
            .prepend
            .checked_sub(header_len)
            .is_some_and(|start| start >= self.data_start());
        front_ok && self.append <= self.data_end()
    }
}
