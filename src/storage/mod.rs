//! Specialized containers.
//!
//! The `storage` module provides containers for use in other modules.
//! The containers support both pre-allocated memory, without the `std`
//! or `alloc` crates being available, and heap-allocated memory.

mod ring_buffer;

pub use self::ring_buffer::RingBuffer;

/// Error returned when enqueuing into a full buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Full;

/// Error returned when dequeuing from an empty buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Empty;

impl core::fmt::Display for Full {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "buffer full")
    }
}

impl core::fmt::Display for Empty {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "buffer empty")
    }
}

impl std::error::Error for Full {}
impl std::error::Error for Empty {}
