//! # Controller Module
//!
//! Controller (master) side of the protocol.
//!
//! This module handles:
//! - Building write frames (header, payload, CRC-8) and read requests
//! - Verifying the checksum of data served by a responder
//! - Returning the responder's status register for every transaction
//! - Polling a busy responder until its deferred work is done
//!
//! The engine is synchronous: every call performs blocking round-trips through
//! its [`Transport`] and returns once the whole exchange is over. It keeps no
//! per-peer state, so one controller can talk to any number of responders as
//! long as calls are serialized.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::error::{EmbeddedCommError, Result};
use crate::protocol::frame::{
    encode_read_request, encode_write_frame, read_checksum, RequestHeader, STATUS_REGISTER_ADDRESS,
    STATUS_SIZE,
};
use crate::protocol::Status;
use crate::transport::Transport;

/// Busy-polling behavior of [`Controller::wait_ready`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Pause between two status polls
    pub busy_poll_interval: Duration,

    /// Maximum number of status polls
    pub busy_poll_attempts: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            busy_poll_interval: Duration::from_millis(1),
            busy_poll_attempts: 100,
        }
    }
}

impl From<&ControllerConfig> for ControllerOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            busy_poll_interval: Duration::from_millis(config.busy_poll_interval_ms),
            busy_poll_attempts: config.busy_poll_attempts,
        }
    }
}

/// Controller protocol engine over a transport `T`
#[derive(Debug)]
pub struct Controller<T: Transport> {
    transport: T,
    options: ControllerOptions,
}

impl<T: Transport> Controller<T> {
    /// Create a controller with default polling options
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ControllerOptions::default())
    }

    /// Create a controller with explicit polling options
    pub fn with_options(transport: T, options: ControllerOptions) -> Self {
        Self { transport, options }
    }

    /// Polling options in use
    pub fn options(&self) -> ControllerOptions {
        self.options
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutable
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the controller and return the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write `data` to `peer` memory starting at `address`
    ///
    /// # Returns
    ///
    /// * `Result<Status>` - Status byte reported by the responder
    ///
    /// # Errors
    ///
    /// Returns `Transport` or `ShortTransfer` if the link failed; the
    /// transaction outcome is unknown in that case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use embedded_comm::controller::Controller;
    /// use embedded_comm::transport::serial::{SerialPeer, SerialTransport};
    ///
    /// let mut controller = Controller::new(SerialTransport::new(1000, 64));
    /// let peer = SerialPeer::new("/dev/ttyACM0", 115_200);
    ///
    /// let status = controller.write(&peer, 2000, &[1])?;
    /// println!("Write status: {}", status);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn write(&mut self, peer: &T::Peer, address: u32, data: &[u8]) -> Result<Status> {
        let size = transfer_size(data.len())?;
        self.write_sized(peer, address, data, size, false)
    }

    /// Write `size` zero bytes starting at `address`
    pub fn write_zeroed(&mut self, peer: &T::Peer, address: u32, size: u32) -> Result<Status> {
        self.write_sized(peer, address, &[], size, false)
    }

    /// Write `data` with a deliberately wrong checksum (fault injection)
    pub fn write_corrupted(&mut self, peer: &T::Peer, address: u32, data: &[u8]) -> Result<Status> {
        let size = transfer_size(data.len())?;
        self.write_sized(peer, address, data, size, true)
    }

    /// Full-form write: `write_size` bytes, taken from `data` and zero-padded
    ///
    /// With `inject_bad_checksum` the trailing checksum is incremented by one.
    pub fn write_sized(
        &mut self,
        peer: &T::Peer,
        address: u32,
        data: &[u8],
        write_size: u32,
        inject_bad_checksum: bool,
    ) -> Result<Status> {
        let frame = encode_write_frame(address, data, write_size, inject_bad_checksum);
        debug!(
            "Write {} byte(s) at address {}{}",
            write_size,
            address,
            if inject_bad_checksum { " (bad checksum)" } else { "" }
        );

        self.send(peer, &frame)?;
        let status = self.receive_status(peer)?;

        debug!("Write status: {}", status);
        Ok(status)
    }

    /// Read `buffer.len()` bytes of `peer` memory starting at `address`
    ///
    /// The served bytes are checked against the responder's checksum. On a
    /// mismatch the trailing status byte is still consumed to keep the
    /// transaction aligned, and `DataCorrupted` is returned; `buffer` must not
    /// be trusted then.
    pub fn read(&mut self, peer: &T::Peer, address: u32, buffer: &mut [u8]) -> Result<Status> {
        let read_size = transfer_size(buffer.len())?;
        let header = RequestHeader::new(read_size, address);
        debug!("Read {} byte(s) at address {}", read_size, address);

        self.send(peer, &encode_read_request(address, read_size))?;
        self.receive(peer, buffer)?;

        let mut received_checksum = [0u8; 1];
        self.receive(peer, &mut received_checksum)?;

        let expected = read_checksum(&header, buffer);
        if expected != received_checksum[0] {
            warn!(
                "Read checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected, received_checksum[0]
            );
            self.receive_status(peer)?;
            return Ok(Status::DATA_CORRUPTED);
        }

        let status = self.receive_status(peer)?;
        debug!("Read status: {}", status);
        Ok(status)
    }

    /// Read the responder's status register
    ///
    /// A one-byte read at the status register address; the returned value is
    /// the terminal status byte of that read.
    pub fn read_status(&mut self, peer: &T::Peer) -> Result<Status> {
        let mut scratch = [0u8; STATUS_SIZE];
        self.read(peer, STATUS_REGISTER_ADDRESS, &mut scratch)
    }

    /// Poll `read_status` while the responder reports `Busy`
    ///
    /// Returns the first status without `Busy`, or the last status seen once
    /// `busy_poll_attempts` polls are used up.
    pub fn wait_ready(&mut self, peer: &T::Peer) -> Result<Status> {
        let mut status = self.read_status(peer)?;
        let mut attempts = 1;

        while status.is_busy() && attempts < self.options.busy_poll_attempts {
            debug!("Responder busy (status {}), polling again", status);
            thread::sleep(self.options.busy_poll_interval);
            status = self.read_status(peer)?;
            attempts += 1;
        }

        if status.is_busy() {
            warn!("Responder still busy after {} poll(s)", attempts);
        }

        Ok(status)
    }

    fn send(&mut self, peer: &T::Peer, bytes: &[u8]) -> Result<()> {
        let written = self
            .transport
            .write_bytes(peer, bytes)
            .map_err(EmbeddedCommError::Transport)?;

        if written != bytes.len() {
            return Err(EmbeddedCommError::ShortTransfer {
                expected: bytes.len(),
                actual: written,
            });
        }

        Ok(())
    }

    fn receive(&mut self, peer: &T::Peer, buffer: &mut [u8]) -> Result<()> {
        let read = self
            .transport
            .read_bytes(peer, buffer)
            .map_err(EmbeddedCommError::Transport)?;

        if read != buffer.len() {
            return Err(EmbeddedCommError::ShortTransfer {
                expected: buffer.len(),
                actual: read,
            });
        }

        Ok(())
    }

    fn receive_status(&mut self, peer: &T::Peer) -> Result<Status> {
        let mut status = [0u8; STATUS_SIZE];
        self.receive(peer, &mut status)?;
        Ok(Status::from_bits(status[0]))
    }
}

fn transfer_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        EmbeddedCommError::InvalidRange(format!("transfer of {} bytes exceeds the 32-bit length field", len))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::crc8;
    use crate::transport::mocks::ScriptedTransport;
    use mockall::mock;
    use std::io;

    mock! {
        pub Link {}

        impl Transport for Link {
            type Peer = u8;

            fn write_bytes(&mut self, peer: &u8, bytes: &[u8]) -> io::Result<usize>;
            fn read_bytes(&mut self, peer: &u8, buffer: &mut [u8]) -> io::Result<usize>;
        }
    }

    const PEER: u8 = 0x17;

    fn fast_options() -> ControllerOptions {
        ControllerOptions {
            busy_poll_interval: Duration::ZERO,
            busy_poll_attempts: 5,
        }
    }

    /// Bytes a responder would clock out for a one-byte status read
    fn status_read_response(data: u8, status: Status) -> Vec<u8> {
        let checksum = read_checksum(&RequestHeader::new(1, STATUS_REGISTER_ADDRESS), &[data]);
        vec![data, checksum, status.bits()]
    }

    #[test]
    fn test_write_sends_frame_and_returns_status() {
        let transport = ScriptedTransport::new();
        transport.queue_response(&[Status::OK.bits()]);
        let mut controller = Controller::new(transport.clone());

        let status = controller.write(&PEER, 5, &[9, 9, 9, 9]).unwrap();

        assert_eq!(status, Status::OK);
        let frames = transport.get_written_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..8], &[4, 0, 0, 0, 5, 0, 0, 0]);
        assert_eq!(&frames[0][8..12], &[9, 9, 9, 9]);
        assert_eq!(frames[0][12], crc8(&frames[0][..12]));
    }

    #[test]
    fn test_write_zeroed() {
        let transport = ScriptedTransport::new();
        transport.queue_response(&[Status::OK.bits()]);
        let mut controller = Controller::new(transport.clone());

        controller.write_zeroed(&PEER, 0, 3).unwrap();

        let frame = &transport.get_written_frames()[0];
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[8..11], &[0, 0, 0]);
    }

    #[test]
    fn test_write_corrupted_increments_checksum() {
        let transport = ScriptedTransport::new();
        transport.queue_response(&[Status::BUSY.bits()]);
        let mut controller = Controller::new(transport.clone());

        let status = controller.write_corrupted(&PEER, 5, &[9]).unwrap();

        assert_eq!(status, Status::BUSY);
        let frame = &transport.get_written_frames()[0];
        assert_eq!(frame[9], crc8(&frame[..9]).wrapping_add(1));
    }

    #[test]
    fn test_read_returns_data_and_status() {
        let transport = ScriptedTransport::new();
        let header = RequestHeader::new(3, 10);
        let data = [7u8, 8, 9];
        transport.queue_response(&data);
        transport.queue_response(&[read_checksum(&header, &data), Status::OK.bits()]);
        let mut controller = Controller::new(transport.clone());

        let mut buffer = [0u8; 3];
        let status = controller.read(&PEER, 10, &mut buffer).unwrap();

        assert_eq!(status, Status::OK);
        assert_eq!(buffer, data);
        assert_eq!(transport.get_written_frames(), vec![header.encode().to_vec()]);
    }

    #[test]
    fn test_read_checksum_mismatch_consumes_status() {
        let transport = ScriptedTransport::new();
        let header = RequestHeader::new(2, 0);
        let good = read_checksum(&header, &[1, 2]);
        transport.queue_response(&[1, 2, good ^ 0xFF, Status::OK.bits()]);
        let mut controller = Controller::new(transport.clone());

        let mut buffer = [0u8; 2];
        let status = controller.read(&PEER, 0, &mut buffer).unwrap();

        assert_eq!(status, Status::DATA_CORRUPTED);
        assert_eq!(transport.remaining_responses(), 0);
    }

    #[test]
    fn test_read_status_is_one_byte_read_at_zero() {
        let transport = ScriptedTransport::new();
        transport.queue_response(&status_read_response(0x80, Status::OK));
        let mut controller = Controller::new(transport.clone());

        assert_eq!(controller.read_status(&PEER).unwrap(), Status::OK);
        assert_eq!(transport.get_written_frames(), vec![vec![1, 0, 0, 0, 0, 0, 0, 0]]);
    }

    #[test]
    fn test_write_transport_error() {
        let transport = ScriptedTransport::new();
        transport.set_write_error(io::ErrorKind::NotConnected);
        let mut controller = Controller::new(transport);

        let result = controller.write(&PEER, 0, &[1]);

        match result {
            Err(EmbeddedCommError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_collapses_to_indeterminate() {
        let transport = ScriptedTransport::new();
        transport.set_read_error(io::ErrorKind::TimedOut);
        let mut controller = Controller::new(transport);

        let status = Status::or_indeterminate(controller.write(&PEER, 0, &[1]));
        assert_eq!(status, Status::INDETERMINATE);
        assert_eq!(status.bits(), 0);
    }

    #[test]
    fn test_short_status_read() {
        // No queued response: the transport returns 0 bytes
        let mut controller = Controller::new(ScriptedTransport::new());

        match controller.write(&PEER, 0, &[1]) {
            Err(EmbeddedCommError::ShortTransfer { expected: 1, actual: 0 }) => {}
            other => panic!("Expected ShortTransfer, got: {:?}", other),
        }
    }

    #[test]
    fn test_failed_write_does_not_read_status() {
        let mut link = MockLink::new();
        link.expect_write_bytes()
            .times(1)
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::BrokenPipe, "bus error")));
        link.expect_read_bytes().times(0);

        let mut controller = Controller::new(link);
        assert!(controller.write(&PEER, 0, &[1, 2]).is_err());
    }

    #[test]
    fn test_short_write_is_reported() {
        let mut link = MockLink::new();
        link.expect_write_bytes()
            .times(1)
            .returning(|_, bytes| Ok(bytes.len() - 1));
        link.expect_read_bytes().times(0);

        let mut controller = Controller::new(link);
        match controller.write(&PEER, 0, &[1, 2]) {
            Err(EmbeddedCommError::ShortTransfer { expected: 11, actual: 10 }) => {}
            other => panic!("Expected ShortTransfer, got: {:?}", other),
        }
    }

    #[test]
    fn test_peer_is_passed_through() {
        let mut link = MockLink::new();
        link.expect_write_bytes()
            .withf(|peer, _| *peer == 0x42)
            .times(1)
            .returning(|_, bytes| Ok(bytes.len()));
        link.expect_read_bytes()
            .withf(|peer, _| *peer == 0x42)
            .times(1)
            .returning(|_, buffer| {
                buffer[0] = Status::OK.bits();
                Ok(1)
            });

        let mut controller = Controller::new(link);
        assert_eq!(controller.write(&0x42, 0, &[1]).unwrap(), Status::OK);
    }

    #[test]
    fn test_wait_ready_polls_until_not_busy() {
        let transport = ScriptedTransport::new();
        transport.queue_response(&status_read_response(0, Status::BUSY));
        transport.queue_response(&status_read_response(0, Status::BUSY));
        transport.queue_response(&status_read_response(0x80, Status::OK));
        let mut controller = Controller::with_options(transport.clone(), fast_options());

        assert_eq!(controller.wait_ready(&PEER).unwrap(), Status::OK);
        assert_eq!(transport.get_written_frames().len(), 3);
    }

    #[test]
    fn test_wait_ready_gives_up() {
        let transport = ScriptedTransport::new();
        for _ in 0..10 {
            transport.queue_response(&status_read_response(0, Status::BUSY));
        }
        let mut controller = Controller::with_options(transport.clone(), fast_options());

        assert_eq!(controller.wait_ready(&PEER).unwrap(), Status::BUSY);
        assert_eq!(transport.get_written_frames().len(), 5);
    }

    #[test]
    fn test_options_from_config() {
        let config = ControllerConfig {
            busy_poll_interval_ms: 25,
            busy_poll_attempts: 7,
        };
        let options = ControllerOptions::from(&config);

        assert_eq!(options.busy_poll_interval, Duration::from_millis(25));
        assert_eq!(options.busy_poll_attempts, 7);
    }
}
