//! In-process multi-drop bus.
//!
//! `SimulatedBus` behaves like an I2C bus seen from the controller: every
//! responder sits at a 7-bit address, a write delivers bytes one at a time to
//! the addressed device's receive handler, and a read clocks bytes out of its
//! request handler. An address nobody answers at is a NACK.
//!
//! The bus handle is cheap to clone. One clone is typically moved into the
//! controller, another into the cooperative task that calls `poll_all()`.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, trace};

use super::{ResponderEvents, Transport};
use crate::error::{EmbeddedCommError, Result};

/// Highest 7-bit bus address
pub const MAX_BUS_ADDRESS: u8 = 0x7F;

type Device = Box<dyn ResponderEvents + Send>;

/// Address registry plus transport for attached responders
#[derive(Clone, Default)]
pub struct SimulatedBus {
    devices: Arc<Mutex<HashMap<u8, Device>>>,
}

impl fmt::Debug for SimulatedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedBus")
            .field("addresses", &self.addresses())
            .finish()
    }
}

impl SimulatedBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a responder at `address`
    ///
    /// # Errors
    ///
    /// `InvalidBusAddress` for addresses above 0x7F, `AddressInUse` if a device
    /// already answers at `address`.
    pub fn attach<D>(&self, address: u8, device: D) -> Result<()>
    where
        D: ResponderEvents + Send + 'static,
    {
        if address > MAX_BUS_ADDRESS {
            return Err(EmbeddedCommError::InvalidBusAddress(address));
        }

        let mut devices = self.devices.lock();
        if devices.contains_key(&address) {
            return Err(EmbeddedCommError::AddressInUse(address));
        }

        devices.insert(address, Box::new(device));
        info!("Attached responder at bus address 0x{:02X}", address);
        Ok(())
    }

    /// Detach the responder at `address`; returns false if none was attached
    pub fn detach(&self, address: u8) -> bool {
        let removed = self.devices.lock().remove(&address).is_some();
        if removed {
            info!("Detached responder at bus address 0x{:02X}", address);
        }
        removed
    }

    /// Returns true if a responder answers at `address`
    pub fn is_attached(&self, address: u8) -> bool {
        self.devices.lock().contains_key(&address)
    }

    /// Attached addresses, ascending
    pub fn addresses(&self) -> Vec<u8> {
        let mut addresses: Vec<u8> = self.devices.lock().keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Run deferred work of the responder at `address`
    pub fn poll(&self, address: u8) -> Result<()> {
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(&address)
            .ok_or_else(|| EmbeddedCommError::PeerNotFound(format!("0x{:02X}", address)))?;

        device.poll();
        Ok(())
    }

    /// Run deferred work of every attached responder
    pub fn poll_all(&self) {
        for device in self.devices.lock().values_mut() {
            device.poll();
        }
    }
}

fn nack(address: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("no device acknowledged at bus address 0x{:02X}", address),
    )
}

impl Transport for SimulatedBus {
    type Peer = u8;

    fn write_bytes(&mut self, peer: &u8, bytes: &[u8]) -> io::Result<usize> {
        let mut devices = self.devices.lock();
        let device = devices.get_mut(peer).ok_or_else(|| nack(*peer))?;

        for &byte in bytes {
            device.on_byte_received(byte);
        }

        trace!("Bus write of {} byte(s) to 0x{:02X}", bytes.len(), peer);
        Ok(bytes.len())
    }

    fn read_bytes(&mut self, peer: &u8, buffer: &mut [u8]) -> io::Result<usize> {
        let mut devices = self.devices.lock();
        let device = devices.get_mut(peer).ok_or_else(|| nack(*peer))?;

        for slot in buffer.iter_mut() {
            *slot = device.on_byte_requested();
        }

        trace!("Bus read of {} byte(s) from 0x{:02X}", buffer.len(), peer);
        Ok(buffer.len())
    }
}
