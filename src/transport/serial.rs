//! # Serial Transport Module
//!
//! Host-side controller transport over a serial or USB CDC device.
//!
//! This module handles:
//! - Opening a port on first use and caching it per device path
//! - Blocking writes with flush
//! - Reads split into `max_chunk_size` pieces (USB CDC endpoints move 64 bytes
//!   per packet)
//! - Dropping a cached port after an I/O error so the next call reopens it

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use tokio_serial::SerialPort;
use tracing::{debug, info, warn};

use super::Transport;
use crate::config::SerialConfig;
use crate::error::{EmbeddedCommError, Result};

/// Default bytes moved per read call
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64;

/// A responder reachable through a serial device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialPeer {
    /// Device path (e.g., "/dev/ttyACM0")
    pub path: String,

    /// Line speed
    pub baud_rate: u32,
}

impl SerialPeer {
    /// Create a peer handle
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    /// Peer described by the `[serial]` configuration section
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
    }
}

impl fmt::Display for SerialPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.baud_rate)
    }
}

/// Blocking serial transport with a per-path port cache
pub struct SerialTransport {
    ports: HashMap<String, Box<dyn SerialPort>>,
    timeout: Duration,
    max_chunk_size: usize,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("open_ports", &self.ports.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("max_chunk_size", &self.max_chunk_size)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Create a transport
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - Per-call read/write timeout
    /// * `max_chunk_size` - Maximum bytes per read call (clamped to at least 1)
    pub fn new(timeout_ms: u64, max_chunk_size: usize) -> Self {
        Self {
            ports: HashMap::new(),
            timeout: Duration::from_millis(timeout_ms),
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Transport described by the `[serial]` configuration section
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.timeout_ms, config.max_chunk_size)
    }

    /// Open `peer` now instead of on first use
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the device cannot be opened or configured.
    pub fn connect(&mut self, peer: &SerialPeer) -> Result<()> {
        self.port(peer).map(|_| ())
    }

    /// Close the cached port of `peer`, if any
    pub fn disconnect(&mut self, peer: &SerialPeer) -> bool {
        self.ports.remove(&peer.path).is_some()
    }

    /// Number of cached ports
    pub fn open_ports(&self) -> usize {
        self.ports.len()
    }

    /// Open a specific serial port, 8N1 without flow control
    fn open_port(&self, peer: &SerialPeer) -> Result<Box<dyn SerialPort>> {
        let port = tokio_serial::new(peer.path.as_str(), peer.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|e| EmbeddedCommError::Serial(format!("Failed to open {}: {}", peer.path, e)))?;

        info!("Opened serial port {}", peer);
        Ok(port)
    }

    fn port(&mut self, peer: &SerialPeer) -> Result<&mut Box<dyn SerialPort>> {
        if !self.ports.contains_key(&peer.path) {
            let port = self.open_port(peer)?;
            self.ports.insert(peer.path.clone(), port);
        }

        let port = self
            .ports
            .get_mut(&peer.path)
            .ok_or_else(|| EmbeddedCommError::PeerNotFound(peer.path.clone()))?;

        if port.baud_rate().ok() != Some(peer.baud_rate) {
            debug!("Switching {} to {} baud", peer.path, peer.baud_rate);
            port.set_baud_rate(peer.baud_rate)
                .map_err(|e| EmbeddedCommError::Serial(format!("Failed to configure {}: {}", peer.path, e)))?;
        }

        Ok(port)
    }

    fn evict_on_error<T>(&mut self, peer: &SerialPeer, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result {
            warn!("I/O error on {}: {}; closing port", peer.path, e);
            self.ports.remove(&peer.path);
        }
        result
    }
}

fn to_io_error(error: EmbeddedCommError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error)
}

impl Transport for SerialTransport {
    type Peer = SerialPeer;

    fn write_bytes(&mut self, peer: &SerialPeer, bytes: &[u8]) -> io::Result<usize> {
        let port = self.port(peer).map_err(to_io_error)?;
        let result = port.write_all(bytes).and_then(|_| port.flush());
        self.evict_on_error(peer, result)?;

        debug!("Sent {} byte(s) to {}", bytes.len(), peer);
        Ok(bytes.len())
    }

    fn read_bytes(&mut self, peer: &SerialPeer, buffer: &mut [u8]) -> io::Result<usize> {
        let max_chunk_size = self.max_chunk_size;
        let port = self.port(peer).map_err(to_io_error)?;
        let result = buffer
            .chunks_mut(max_chunk_size)
            .try_for_each(|chunk| port.read_exact(chunk));
        self.evict_on_error(peer, result)?;

        debug!("Received {} byte(s) from {}", buffer.len(), peer);
        Ok(buffer.len())
    }
}
