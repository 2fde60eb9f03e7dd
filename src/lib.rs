/*! Raw IP datagram delivery for a userspace protocol stack.

Inbound datagrams that no transport endpoint claims, but that an
application asked to see through the raw filter of an [`Ip`](iface::Ip)
instance, are queued by [`Ip::raw_in`](iface::Ip::raw_in) and picked up
by application threads with [`api::raw_packet_receive`].

A receive either returns a packet at once, suspends the calling thread
until one arrives, or gives up after a bounded wait. Producers hand a
packet straight to the oldest suspended receiver instead of queuing it,
and every packet is bounds-checked before a caller gets to see it.
*/

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod context;
pub mod iface;
pub mod pkbuf;
pub mod raw;
pub mod storage;
pub mod time;
pub mod wait;
pub mod wire;
