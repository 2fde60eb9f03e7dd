//! Compile-time limits of an IP instance.

/// Tag stored in a live [`Ip`](crate::iface::Ip) instance ("IP I" in ASCII).
pub const IP_ID: u32 = 0x4950_2049;

/// Default logical maximum of the raw receive queue.
pub const RAW_QUEUE_DEFAULT_MAX: usize = 20;

/// Number of protocols a raw filter can list.
pub const RAW_FILTER_MAX_COUNT: usize = 8;
