use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use heapless::Vec;
use managed::ManagedSlice;

use crate::config::{IP_ID, RAW_FILTER_MAX_COUNT, RAW_QUEUE_DEFAULT_MAX};
use crate::pkbuf::PacketBuffer;
use crate::raw::{Overflow, RawQueue};
use crate::wire::IpProtocol;

mod raw;

/// Configuration structure used for creating an IP instance.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether raw IP processing starts enabled.
    pub raw_enabled: bool,

    /// Logical maximum of the raw receive queue.
    ///
    /// Clamped to the length of the storage handed to [`Ip::new`].
    pub raw_queue_max: usize,

    /// What a full raw receive queue does with one more packet.
    pub raw_overflow: Overflow,
}

impl Config {
    pub fn new() -> Self {
        Config {
            raw_enabled: false,
            raw_queue_max: RAW_QUEUE_DEFAULT_MAX,
            raw_overflow: Overflow::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterFull;

impl core::fmt::Display for FilterFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Raw filter full")
    }
}

impl std::error::Error for FilterFull {}

/// An IP protocol stack instance.
///
/// Owned by whoever builds the stack and passed by reference to every
/// operation; share it across threads with `Arc` or scoped threads.
#[derive(Debug)]
pub struct Ip<'a> {
    id: AtomicU32,
    /// Also the raw gate: open exactly while raw processing is enabled.
    raw_queue: RawQueue<'a>,
    /// Protocols delivered to the raw queue; empty accepts every protocol.
    raw_filter: Mutex<Vec<IpProtocol, RAW_FILTER_MAX_COUNT>>,
}

impl<'a> Ip<'a> {
    /// Create an instance whose raw receive queue lives in `raw_storage`.
    pub fn new<S>(config: Config, raw_storage: S) -> Self
    where
        S: Into<ManagedSlice<'a, Option<PacketBuffer>>>,
    {
        let ip = Ip {
            id: AtomicU32::new(IP_ID),
            raw_queue: RawQueue::new(raw_storage, config.raw_queue_max, config.raw_overflow),
            raw_filter: Mutex::new(Vec::new()),
        };
        if config.raw_enabled {
            ip.raw_packet_enable();
        }
        ip
    }

    /// Query whether the instance is alive, i.e. still carries its id tag.
    pub fn is_valid(&self) -> bool {
        self.id.load(Ordering::Acquire) == IP_ID
    }

    /// Tear the instance down.
    ///
    /// Raw processing is disabled, which releases queued packets and wakes
    /// every suspended consumer; the checked API rejects the instance from
    /// then on.
    pub fn delete(&self) {
        self.id.store(0, Ordering::Release);
        self.raw_packet_disable();
    }

    pub fn raw_queue(&self) -> &RawQueue<'a> {
        &self.raw_queue
    }

    fn raw_filter(&self) -> MutexGuard<'_, Vec<IpProtocol, RAW_FILTER_MAX_COUNT>> {
        self.raw_filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
