//! Wait options and the registry of suspended consumers.
//!
//! A consumer that finds its queue empty registers a [`Waiter`] and parks on
//! the waiter's condition variable, releasing the queue lock while asleep.
//! Producers never just signal: they write the value straight into the
//! oldest waiter's slot while holding the queue lock, so a woken consumer
//! never has to go looking for its packet.
//!
//! Every method taking `&mut WaitQueue` runs under the lock of the structure
//! that owns the registry. That single lock is what makes a hand-off and a
//! timeout mutually exclusive for a given waiter.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::time::{Duration, Instant};

/// How long a caller is willing to block for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitOption {
    /// Return immediately.
    #[default]
    NoWait,
    /// Block for at most the given duration.
    Timeout(Duration),
    /// Block until woken.
    Forever,
}

impl WaitOption {
    /// Tick-style encoding: `0` never blocks, `u32::MAX` blocks forever,
    /// anything else is a timeout in milliseconds.
    pub const fn from_ticks(ticks: u32) -> WaitOption {
        match ticks {
            0 => WaitOption::NoWait,
            u32::MAX => WaitOption::Forever,
            millis => WaitOption::Timeout(Duration::from_millis(millis as u64)),
        }
    }

    /// Fix the point in time after which the wait gives up.
    pub(crate) fn deadline(self, now: Instant) -> Deadline {
        match self {
            WaitOption::NoWait => Deadline::Now,
            WaitOption::Timeout(d) if d == Duration::ZERO => Deadline::Now,
            // too far out to represent: no different from forever
            WaitOption::Timeout(d) => match now.checked_add(d) {
                Some(at) => Deadline::At(at),
                None => Deadline::Never,
            },
            WaitOption::Forever => Deadline::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Now,
    At(Instant),
    Never,
}

impl Deadline {
    pub(crate) fn expired(&self, now: Instant) -> bool {
        match *self {
            Deadline::Now => true,
            Deadline::At(at) => now >= at,
            Deadline::Never => false,
        }
    }

    /// Time left before expiry; `None` means unbounded.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        match *self {
            Deadline::Now => Some(Duration::ZERO),
            Deadline::At(at) if now >= at => Some(Duration::ZERO),
            Deadline::At(at) => Some(at - now),
            Deadline::Never => None,
        }
    }
}

/// Why a waiter was woken.
#[derive(Debug)]
pub(crate) enum Wake<T> {
    Ready(T),
    Aborted,
}

/// One suspended consumer.
#[derive(Debug)]
pub(crate) struct Waiter<T> {
    slot: Mutex<Option<Wake<T>>>,
    cond: Condvar,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        Waiter {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn fill(&self, wake: Wake<T>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(wake);
        self.cond.notify_one();
    }

    /// Take the hand-off, if one was made.
    pub(crate) fn take(&self) -> Option<Wake<T>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Park until notified or `timeout` elapses, releasing `guard` meanwhile.
    ///
    /// `guard` must always come from the lock owning the registry this
    /// waiter was registered in. Spurious wake-ups are possible.
    pub(crate) fn sleep<'g, G>(
        &self,
        guard: MutexGuard<'g, G>,
        timeout: Option<Duration>,
    ) -> MutexGuard<'g, G> {
        match timeout {
            Some(timeout) => {
                self.cond
                    .wait_timeout(guard, timeout.into())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// FIFO registry of suspended consumers.
#[derive(Debug)]
pub(crate) struct WaitQueue<T> {
    waiters: VecDeque<Arc<Waiter<T>>>,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        WaitQueue {
            waiters: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Append a new waiter behind every waiter already registered.
    pub(crate) fn register(&mut self) -> Arc<Waiter<T>> {
        let waiter = Arc::new(Waiter::new());
        self.waiters.push_back(Arc::clone(&waiter));
        waiter
    }

    /// Unregister `target`. Returns `false` if it was no longer registered.
    pub(crate) fn remove(&mut self, target: &Arc<Waiter<T>>) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| !Arc::ptr_eq(w, target));
        before != self.waiters.len()
    }

    /// Hand `value` to the oldest waiter and wake it, or give `value` back
    /// if nobody is waiting.
    pub(crate) fn wake_one(&mut self, value: T) -> Result<(), T> {
        match self.waiters.pop_front() {
            Some(waiter) => {
                waiter.fill(Wake::Ready(value));
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Abort every waiter. Returns how many were woken.
    pub(crate) fn wake_all_aborted(&mut self) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            waiter.fill(Wake::Aborted);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ticks() {
        assert_eq!(WaitOption::from_ticks(0), WaitOption::NoWait);
        assert_eq!(WaitOption::from_ticks(u32::MAX), WaitOption::Forever);
        assert_eq!(
            WaitOption::from_ticks(250),
            WaitOption::Timeout(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_deadline() {
        let now = Instant::from_millis(1_000);
        assert_eq!(WaitOption::NoWait.deadline(now), Deadline::Now);
        assert_eq!(
            WaitOption::Timeout(Duration::ZERO).deadline(now),
            Deadline::Now
        );

        let deadline = WaitOption::Timeout(Duration::from_millis(50)).deadline(now);
        assert!(!deadline.expired(now));
        assert_eq!(deadline.remaining(now), Some(Duration::from_millis(50)));
        assert!(deadline.expired(Instant::from_millis(1_050)));
        assert_eq!(
            deadline.remaining(Instant::from_millis(1_100)),
            Some(Duration::ZERO)
        );

        let huge = WaitOption::Timeout(Duration::from_micros(u64::MAX)).deadline(now);
        assert_eq!(huge, Deadline::Never);
        let huge = WaitOption::Timeout(Duration::from_millis(u64::MAX)).deadline(now);
        assert_eq!(huge, Deadline::Never);

        let forever = WaitOption::Forever.deadline(now);
        assert!(!forever.expired(Instant::from_millis(i64::MAX / 1000)));
        assert_eq!(forever.remaining(now), None);
    }

    #[test]
    fn test_wake_order() {
        let mut queue = WaitQueue::new();
        let first = queue.register();
        let second = queue.register();
        assert_eq!(queue.len(), 2);

        assert!(queue.wake_one(1).is_ok());
        assert!(matches!(first.take(), Some(Wake::Ready(1))));
        assert!(second.take().is_none());

        assert!(queue.wake_one(2).is_ok());
        assert!(matches!(second.take(), Some(Wake::Ready(2))));
        assert_eq!(queue.wake_one(3), Err(3));
    }

    #[test]
    fn test_remove_and_abort() {
        let mut queue: WaitQueue<u8> = WaitQueue::new();
        let gone = queue.register();
        let stays = queue.register();
        assert!(queue.remove(&gone));
        assert!(!queue.remove(&gone));

        assert_eq!(queue.wake_all_aborted(), 1);
        assert_eq!(queue.len(), 0);
        assert!(matches!(stays.take(), Some(Wake::Aborted)));
        assert!(gone.take().is_none());
    }
}
