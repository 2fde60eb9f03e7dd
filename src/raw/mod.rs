//! Raw IP receive path.
//!
//! Packets that no transport endpoint claims, but that pass the raw filter
//! of an IP instance, wait in a [`RawQueue`] until an application thread
//! picks them up with [`receive`].

use core::fmt;

mod queue;

pub use self::queue::{Delivery, Overflow, RawQueue, RawStats};

use crate::pkbuf::PacketBuffer;
use crate::time::Instant;
use crate::wait::WaitOption;
use crate::wire::IPV4_HEADER_LEN;

/// Why a raw receive returned without a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing arrived within the wait budget.
    NoPacket,
    /// Raw processing is disabled, or was disabled during the wait.
    NotEnabled,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::NoPacket => write!(f, "no packet"),
            RecvError::NotEnabled => write!(f, "raw processing not enabled"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Take the next structurally valid packet from `queue`.
///
/// A packet whose window leaves no room for an IPv4 header behind `prepend`,
/// or whose `append` runs past its region, is released and the wait goes on
/// for the next one. The wait budget is fixed on entry and shared by every
/// retry.
///
/// A retry registers again at the tail of the waiter list, so a consumer
/// that was handed a corrupted packet waits behind everyone who started
/// waiting before the retry.
pub fn receive(queue: &RawQueue<'_>, wait: WaitOption) -> Result<PacketBuffer, RecvError> {
    let deadline = wait.deadline(Instant::now());
    loop {
        let pkbuf = queue.dequeue(deadline)?;
        if pkbuf.check_window(IPV4_HEADER_LEN) {
            queue.record_delivered();
            return Ok(pkbuf);
        }

        net_debug!("raw receive: releasing corrupted {:?}", pkbuf);
        drop(pkbuf);
        queue.record_invalid();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use rand::Rng;

    use super::*;
    use crate::pkbuf::PacketPool;
    use crate::time::Duration;

    fn setup_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn queue(slots: usize) -> RawQueue<'static> {
        let storage: Vec<Option<PacketBuffer>> = (0..slots).map(|_| None).collect();
        let queue = RawQueue::new(storage, slots, Overflow::DropOldest);
        queue.open();
        queue
    }

    fn packet(pool: &Arc<PacketPool>, tag: u32) -> PacketBuffer {
        let mut pkbuf = pool.allocate(IPV4_HEADER_LEN).unwrap();
        pkbuf.append_data(&tag.to_be_bytes()).unwrap();
        pkbuf
    }

    fn corrupted(pool: &Arc<PacketPool>) -> PacketBuffer {
        let mut pkbuf = packet(pool, 0xdead);
        let end = pkbuf.data_end();
        pkbuf.set_window_unchecked(IPV4_HEADER_LEN, end + 1);
        pkbuf
    }

    fn tag(pkbuf: &PacketBuffer) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(pkbuf.payload());
        u32::from_be_bytes(bytes)
    }

    #[test]
    fn test_random_sequences_are_fifo() {
        setup_logging();
        let mut rng = rand::thread_rng();
        let pool = PacketPool::new(32, 64);
        let queue = queue(32);
        for _ in 0..20 {
            let count = rng.gen_range(1..=32u32);
            let base: u32 = rng.gen();
            for i in 0..count {
                queue.enqueue(packet(&pool, base.wrapping_add(i)));
            }
            for i in 0..count {
                let pkbuf = receive(&queue, WaitOption::NoWait).unwrap();
                assert_eq!(tag(&pkbuf), base.wrapping_add(i));
            }
            assert!(queue.is_empty());
        }
        assert_eq!(pool.stats().free, 32);
    }

    #[test]
    fn test_no_wait_on_empty_queue() {
        let queue = queue(4);
        let started = std::time::Instant::now();
        assert_eq!(
            receive(&queue, WaitOption::NoWait).unwrap_err(),
            RecvError::NoPacket
        );
        assert!(started.elapsed() < std::time::Duration::from_millis(100));
        assert_eq!(queue.waiter_count(), 0);
    }

    #[test]
    fn test_single_packet_round_trip() {
        let pool = PacketPool::new(1, 64);
        let queue = queue(4);
        let pkbuf = packet(&pool, 42);
        let before = pkbuf.payload().as_ptr();
        queue.enqueue(pkbuf);

        let got = receive(&queue, WaitOption::NoWait).unwrap();
        assert_eq!(got.payload().as_ptr(), before);
        assert_eq!(tag(&got), 42);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().delivered, 1);
    }

    #[test]
    fn test_corrupted_packet_is_skipped() {
        setup_logging();
        let pool = PacketPool::new(2, 64);
        let queue = queue(4);
        queue.enqueue(corrupted(&pool));
        queue.enqueue(packet(&pool, 1));

        let got = receive(&queue, WaitOption::Forever).unwrap();
        assert_eq!(tag(&got), 1);
        assert_eq!(queue.stats().invalid_released, 1);
        assert_eq!(pool.stats().released, 1);
    }

    #[test]
    fn test_corrupted_prepend_is_skipped() {
        let pool = PacketPool::new(2, 64);
        let queue = queue(4);
        let mut bad = packet(&pool, 9);
        bad.set_window_unchecked(IPV4_HEADER_LEN - 1, IPV4_HEADER_LEN + 4);
        queue.enqueue(bad);

        assert_eq!(
            receive(&queue, WaitOption::NoWait).unwrap_err(),
            RecvError::NoPacket
        );
        assert_eq!(pool.stats().released, 1);
        assert_eq!(queue.stats().invalid_released, 1);
    }

    #[test]
    fn test_corrupted_then_timeout_keeps_budget() {
        let pool = PacketPool::new(1, 64);
        let queue = queue(4);
        queue.enqueue(corrupted(&pool));

        let started = std::time::Instant::now();
        let wait = WaitOption::Timeout(Duration::from_millis(40));
        assert_eq!(receive(&queue, wait).unwrap_err(), RecvError::NoPacket);
        let elapsed = started.elapsed();
        assert!(elapsed >= std::time::Duration::from_micros(39_990));
        assert!(elapsed < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_wakes_suspended_consumer() {
        setup_logging();
        let pool = PacketPool::new(1, 64);
        let queue = queue(4);
        thread::scope(|s| {
            let consumer = s.spawn(|| {
                let got = receive(&queue, WaitOption::Forever).unwrap();
                (tag(&got), std::time::Instant::now())
            });
            while queue.waiter_count() == 0 {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            thread::sleep(std::time::Duration::from_millis(50));
            let sent = std::time::Instant::now();
            assert_eq!(queue.enqueue(packet(&pool, 5)), Delivery::HandedOff);

            let (got, woke) = consumer.join().unwrap();
            assert_eq!(got, 5);
            assert!(woke.duration_since(sent) < std::time::Duration::from_secs(1));
        });
        assert_eq!(queue.stats().handed_off, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_one_packet_per_waiter_in_order() {
        let pool = PacketPool::new(2, 64);
        let queue = queue(4);
        thread::scope(|s| {
            let first = s.spawn(|| tag(&receive(&queue, WaitOption::Forever).unwrap()));
            while queue.waiter_count() < 1 {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            let second = s.spawn(|| tag(&receive(&queue, WaitOption::Forever).unwrap()));
            while queue.waiter_count() < 2 {
                thread::sleep(std::time::Duration::from_millis(1));
            }

            queue.enqueue(packet(&pool, 1));
            assert_eq!(first.join().unwrap(), 1);
            assert_eq!(queue.waiter_count(), 1);
            assert!(!second.is_finished());

            queue.enqueue(packet(&pool, 2));
            assert_eq!(second.join().unwrap(), 2);
        });
    }

    #[test]
    fn test_huge_timeout_blocks() {
        let pool = PacketPool::new(1, 64);
        let queue = queue(4);
        thread::scope(|s| {
            let consumer = s.spawn(|| {
                let wait = WaitOption::Timeout(Duration::from_micros(u64::MAX));
                receive(&queue, wait).map(|pkbuf| tag(&pkbuf))
            });
            while queue.waiter_count() == 0 {
                assert!(!consumer.is_finished());
                thread::sleep(std::time::Duration::from_millis(1));
            }
            thread::sleep(std::time::Duration::from_millis(20));
            assert!(!consumer.is_finished());
            queue.enqueue(packet(&pool, 11));
            assert_eq!(consumer.join().unwrap(), Ok(11));
        });
    }

    #[test]
    fn test_retry_after_corrupted_hand_off_waits_at_tail() {
        let pool = PacketPool::new(3, 64);
        let queue = queue(4);
        thread::scope(|s| {
            let first = s.spawn(|| tag(&receive(&queue, WaitOption::Forever).unwrap()));
            while queue.waiter_count() < 1 {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            let second = s.spawn(|| tag(&receive(&queue, WaitOption::Forever).unwrap()));
            while queue.waiter_count() < 2 {
                thread::sleep(std::time::Duration::from_millis(1));
            }

            assert_eq!(queue.enqueue(corrupted(&pool)), Delivery::HandedOff);
            // the first consumer releases it and registers again
            while queue.stats().invalid_released < 1 || queue.waiter_count() < 2 {
                thread::sleep(std::time::Duration::from_millis(1));
            }

            queue.enqueue(packet(&pool, 1));
            assert_eq!(second.join().unwrap(), 1);
            queue.enqueue(packet(&pool, 2));
            assert_eq!(first.join().unwrap(), 2);
        });
        assert_eq!(pool.stats().free, 3);
    }

    #[test]
    fn test_close_aborts_waiters() {
        let queue = queue(4);
        thread::scope(|s| {
            let waiters: Vec<_> = (0..3)
                .map(|_| s.spawn(|| receive(&queue, WaitOption::Forever)))
                .collect();
            while queue.waiter_count() < 3 {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            assert_eq!(queue.close(), (0, 3));
            for waiter in waiters {
                assert_eq!(waiter.join().unwrap().unwrap_err(), RecvError::NotEnabled);
            }
        });
    }

    #[test]
    fn test_delivery_and_timeout_are_exclusive() {
        let pool = PacketPool::new(64, 64);
        let queue = queue(64);
        for round in 0..50u32 {
            thread::scope(|s| {
                let consumer = s.spawn(|| {
                    receive(&queue, WaitOption::Timeout(Duration::from_millis(2)))
                });
                thread::sleep(std::time::Duration::from_millis(2));
                let delivery = queue.enqueue(packet(&pool, round));
                assert_ne!(delivery, Delivery::Dropped);
                let got = match consumer.join().unwrap() {
                    Ok(pkbuf) => pkbuf,
                    Err(err) => {
                        // timed out first: the packet must have been queued
                        assert_eq!(err, RecvError::NoPacket);
                        assert_ne!(delivery, Delivery::HandedOff);
                        receive(&queue, WaitOption::NoWait).unwrap()
                    }
                };
                assert_eq!(tag(&got), round);
                assert!(queue.is_empty());
            });
        }
        assert_eq!(pool.stats().free, 64);
    }
}
