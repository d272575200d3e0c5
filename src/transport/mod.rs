//! # Transport Module
//!
//! Capability traits that connect the protocol engines to a physical link.
//!
//! This module handles:
//! - `Transport`: the blocking "write bytes" / "read bytes" pair a controller needs
//! - `ResponderEvents`: the "byte arrived" / "byte requested" / poll callbacks a
//!   responder exposes to its bus driver
//! - An in-process simulated bus (`bus`) and a host serial transport (`serial`)

pub mod bus;
pub mod serial;

use std::io;

/// Blocking byte transport consumed by the controller engine
///
/// Both calls are ordered and reliable within one invocation. They return the
/// number of bytes actually moved; the controller treats anything short of the
/// requested count as a failed transfer.
pub trait Transport {
    /// Transport-specific peer identifier (bus address, device path, ...)
    type Peer;

    /// Send `bytes` to `peer`
    fn write_bytes(&mut self, peer: &Self::Peer, bytes: &[u8]) -> io::Result<usize>;

    /// Fill `buffer` with bytes clocked out of `peer`
    fn read_bytes(&mut self, peer: &Self::Peer, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Event callbacks a bus driver invokes on a responder
///
/// `on_byte_received` and `on_byte_requested` may run in interrupt context and
/// must stay bounded and non-blocking. `poll` runs from the cooperative loop.
pub trait ResponderEvents {
    /// The controller wrote one byte
    fn on_byte_received(&mut self, byte: u8);

    /// The controller clocks one byte out
    fn on_byte_requested(&mut self) -> u8;

    /// Run deferred work outside the byte-handler path
    fn poll(&mut self);
}
