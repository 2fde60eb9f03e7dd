//! Checked entry points.
//!
//! These wrap the unchecked [`Ip`] methods with the argument and caller
//! checks an application-facing API needs: the instance must be present and
//! alive, and the caller must run in a context allowed to make the call.
//! Failures here are usage errors and never reach the raw queue.

use core::fmt;

use crate::context::{self, ExecContext};
use crate::iface::Ip;
use crate::pkbuf::PacketBuffer;
use crate::raw::RecvError;
use crate::wait::WaitOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Missing or deleted instance.
    InvalidPointer,
    /// Raw processing is disabled.
    NotEnabled,
    /// Nothing arrived within the wait budget.
    NoPacket,
    /// Called from a context that may not make this call.
    Caller,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPointer => write!(f, "invalid instance"),
            Error::NotEnabled => write!(f, "raw processing not enabled"),
            Error::NoPacket => write!(f, "no packet"),
            Error::Caller => write!(f, "invalid caller context"),
        }
    }
}

impl std::error::Error for Error {}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        match err {
            RecvError::NoPacket => Error::NoPacket,
            RecvError::NotEnabled => Error::NotEnabled,
        }
    }
}

fn check_instance<'i, 'a>(ip: Option<&'i Ip<'a>>) -> Result<&'i Ip<'a>, Error> {
    match ip {
        Some(ip) if ip.is_valid() => Ok(ip),
        _ => Err(Error::InvalidPointer),
    }
}

fn threads_only() -> Result<(), Error> {
    match context::current() {
        ExecContext::Thread => Ok(()),
        _ => Err(Error::Caller),
    }
}

fn init_and_threads() -> Result<(), Error> {
    match context::current() {
        ExecContext::Thread | ExecContext::Initialize => Ok(()),
        ExecContext::Interrupt => Err(Error::Caller),
    }
}

/// Receive a raw IP datagram.
///
/// On success the caller owns the returned buffer and releases it by
/// dropping it or handing it to [`PacketPool::release`].
///
/// [`PacketPool::release`]: crate::pkbuf::PacketPool::release
pub fn raw_packet_receive(ip: Option<&Ip<'_>>, wait: WaitOption) -> Result<PacketBuffer, Error> {
    let ip = check_instance(ip)?;
    if !ip.raw_enabled() {
        return Err(Error::NotEnabled);
    }
    threads_only()?;

    Ok(ip.raw_packet_receive(wait)?)
}

pub fn raw_packet_enable(ip: Option<&Ip<'_>>) -> Result<(), Error> {
    let ip = check_instance(ip)?;
    init_and_threads()?;
    ip.raw_packet_enable();
    Ok(())
}

pub fn raw_packet_disable(ip: Option<&Ip<'_>>) -> Result<(), Error> {
    let ip = check_instance(ip)?;
    init_and_threads()?;
    ip.raw_packet_disable();
    Ok(())
}

pub fn raw_receive_queue_max_set(ip: Option<&Ip<'_>>, max: usize) -> Result<usize, Error> {
    let ip = check_instance(ip)?;
    init_and_threads()?;
    Ok(ip.raw_receive_queue_max_set(max))
}
