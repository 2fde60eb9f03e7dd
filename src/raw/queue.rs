use std::sync::{Mutex, MutexGuard, PoisonError};

use managed::ManagedSlice;

use super::RecvError;
use crate::pkbuf::PacketBuffer;
use crate::storage::RingBuffer;
use crate::time::Instant;
use crate::wait::{Deadline, WaitQueue, Wake};

/// What a full queue does with one more packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Release the oldest queued packet to make room.
    #[default]
    DropOldest,
    /// Release the arriving packet.
    DropNewest,
}

/// Outcome of [`RawQueue::enqueue`], reported to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Given straight to a suspended consumer.
    HandedOff,
    /// Queued; `evicted` is set when the oldest packet was released for it.
    Queued { evicted: bool },
    /// Released without being queued.
    Dropped,
}

/// Raw receive counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RawStats {
    /// Packets offered to the queue.
    pub received: u64,
    /// Packets given directly to a suspended consumer.
    pub handed_off: u64,
    /// Packets released by the overflow policy or a closed queue.
    pub dropped: u64,
    /// Corrupted packets released by the receive operation.
    pub invalid_released: u64,
    /// Packets returned to a caller.
    pub delivered: u64,
}

#[derive(Debug)]
struct Inner<'a> {
    ring: RingBuffer<'a, Option<PacketBuffer>>,
    max: usize,
    overflow: Overflow,
    open: bool,
    waiters: WaitQueue<PacketBuffer>,
    stats: RawStats,
}

impl<'a> Inner<'a> {
    fn pop(&mut self) -> Option<PacketBuffer> {
        self.ring.dequeue_one().ok().and_then(Option::take)
    }

    fn drain(&mut self) -> Vec<PacketBuffer> {
        let mut drained = Vec::with_capacity(self.ring.len());
        while let Some(pkbuf) = self.pop() {
            drained.push(pkbuf);
        }
        drained
    }
}

/// Bounded FIFO of raw packets with direct hand-off to suspended consumers.
///
/// Invariant: waiters are only registered while the ring is empty, and a
/// packet only enters the ring when no waiter is registered.
#[derive(Debug)]
pub struct RawQueue<'a> {
    inner: Mutex<Inner<'a>>,
}

impl<'a> RawQueue<'a> {
    /// Create a queue over `storage`, holding at most `max` packets.
    ///
    /// `max` is clamped to the storage length.
    pub fn new<S>(storage: S, max: usize, overflow: Overflow) -> RawQueue<'a>
    where
        S: Into<ManagedSlice<'a, Option<PacketBuffer>>>,
    {
        let ring = RingBuffer::new(storage);
        let max = max.min(ring.capacity());
        RawQueue {
            inner: Mutex::new(Inner {
                ring,
                max,
                overflow,
                open: false,
                waiters: WaitQueue::new(),
                stats: RawStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<'a>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ring.is_empty()
    }

    /// Number of storage slots; the upper bound for [`max`](Self::max).
    pub fn capacity(&self) -> usize {
        self.lock().ring.capacity()
    }

    pub fn max(&self) -> usize {
        self.lock().max
    }

    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn stats(&self) -> RawStats {
        self.lock().stats
    }

    pub(crate) fn record_invalid(&self) {
        self.lock().stats.invalid_released += 1;
    }

    pub(crate) fn record_delivered(&self) {
        self.lock().stats.delivered += 1;
    }

    /// Accept packets again.
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Stop accepting packets, release every queued packet and abort every
    /// suspended consumer. Returns `(released, woken)`.
    pub fn close(&self) -> (usize, usize) {
        let mut inner = self.lock();
        inner.open = false;
        let drained = inner.drain();
        let woken = inner.waiters.wake_all_aborted();
        drop(inner);

        let released = drained.len();
        net_debug!("raw queue closed: released {} packets, woke {} waiters", released, woken);
        (released, woken)
    }

    /// Change the logical maximum. Packets beyond the new maximum are
    /// released, oldest first. Returns the maximum actually applied.
    pub fn set_max(&self, max: usize) -> usize {
        let mut inner = self.lock();
        if max > inner.ring.capacity() {
            net_debug!(
                "raw queue max {} exceeds storage of {}, clamping",
                max,
                inner.ring.capacity()
            );
        }
        inner.max = max.min(inner.ring.capacity());
        let mut evicted = Vec::new();
        while inner.ring.len() > inner.max {
            match inner.pop() {
                Some(pkbuf) => evicted.push(pkbuf),
                None => break,
            }
        }
        inner.stats.dropped += evicted.len() as u64;
        inner.max
    }

    /// Deliver `pkbuf` to the oldest suspended consumer, or queue it.
    pub fn enqueue(&self, pkbuf: PacketBuffer) -> Delivery {
        let mut inner = self.lock();
        inner.stats.received += 1;

        if !inner.open {
            inner.stats.dropped += 1;
            net_trace!("raw queue closed, dropping {:?}", pkbuf);
            return Delivery::Dropped;
        }

        let pkbuf = match inner.waiters.wake_one(pkbuf) {
            Ok(()) => {
                inner.stats.handed_off += 1;
                return Delivery::HandedOff;
            }
            Err(pkbuf) => pkbuf,
        };

        let mut evicted = None;
        if inner.ring.len() >= inner.max {
            match inner.overflow {
                Overflow::DropOldest if inner.max > 0 => evicted = inner.pop(),
                _ => {
                    inner.stats.dropped += 1;
                    net_trace!("raw queue full, dropping {:?}", pkbuf);
                    return Delivery::Dropped;
                }
            }
            inner.stats.dropped += 1;
        }

        match inner.ring.enqueue_one() {
            Ok(slot) => *slot = Some(pkbuf),
            Err(_) => {
                inner.stats.dropped += 1;
                return Delivery::Dropped;
            }
        }
        drop(inner);

        Delivery::Queued {
            evicted: evicted.is_some(),
        }
    }

    /// Take the oldest packet, suspending until `deadline` if there is none.
    pub(crate) fn dequeue(&self, deadline: Deadline) -> Result<PacketBuffer, RecvError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(RecvError::NotEnabled);
        }
        if let Some(pkbuf) = inner.pop() {
            return Ok(pkbuf);
        }
        if deadline == Deadline::Now {
            return Err(RecvError::NoPacket);
        }

        let waiter = inner.waiters.register();
        net_trace!("raw queue empty, suspending ({} waiters)", inner.waiters.len());
        loop {
            if let Some(wake) = waiter.take() {
                return match wake {
                    Wake::Ready(pkbuf) => Ok(pkbuf),
                    Wake::Aborted => Err(RecvError::NotEnabled),
                };
            }
            let now = Instant::now();
            if deadline.expired(now) {
                inner.waiters.remove(&waiter);
                return Err(RecvError::NoPacket);
            }
            inner = waiter.sleep(inner, deadline.remaining(now));
        }
    }
}
