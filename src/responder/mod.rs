//! # Responder Module
//!
//! Byte-driven responder engine exposing a memory region to a controller.
//!
//! The bus driver calls [`Responder::on_byte_received`] for every byte the
//! controller writes and [`Responder::on_byte_requested`] for every byte it
//! clocks out. Both run in bounded time and never allocate, so they can be
//! driven straight from an interrupt handler. Anything slow (restoring a
//! backup, memory-change callbacks) is only scheduled there and executed by
//! [`Responder::process`] from the cooperative loop.
//!
//! ## Transaction states
//!
//! The position inside a transaction is derived from a byte counter that is
//! reset at the end of every transaction (see [`Phase`]):
//!
//! ```text
//! byte 0..=3        length (LE)
//! byte 4..=7        address (LE)
//! byte 8..8+len     data (written by controller, or served by responder)
//! byte 8+len        checksum
//! beyond            write: protocol violation / read: terminal status byte
//! ```
//!
//! ## Backups
//!
//! With backups enabled every memory byte is copied to the backup buffer just
//! before it is overwritten. If the trailing checksum then mismatches, the
//! terminal status byte reports `Busy` and the next `process()` call copies
//! the saved bytes back.

pub mod callbacks;
pub mod pending;
pub mod shared;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::ResponderConfig;
use crate::error::{EmbeddedCommError, Result};
use crate::protocol::crc::crc8_step;
use crate::protocol::frame::{Phase, FIELD_SIZE, HEADER_SIZE, STATUS_REGISTER_ADDRESS, TX_CHECKSUM_REGISTER_ADDRESS};
use crate::protocol::Status;
use crate::transport::ResponderEvents;

pub use callbacks::{MemoryCallback, MAX_CALLBACKS};
pub use pending::PendingWork;
pub use shared::SharedResponder;

/// Per-transaction counters, zeroed at the end of every transaction
#[derive(Debug, Default, Clone, Copy)]
struct Transfer {
    byte_counter: u32,
    length: u32,
    address: u32,
    checksum: u8,
    /// Data bytes applied to memory (and saved to the backup buffer)
    applied: u32,
}

/// Memory span saved in the backup buffer, waiting to be copied back
#[derive(Debug, Default, Clone, Copy)]
struct RestoreSpan {
    address: u32,
    length: u32,
}

/// Responder protocol engine
///
/// Generic over the storage of the memory region and backup buffer, so it can
/// own a `Vec<u8>` or borrow a `&mut [u8]` owned by the application.
pub struct Responder<M = Vec<u8>>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    memory: M,
    backup: Option<M>,
    mirror_registers: bool,
    transfer: Transfer,
    status: Status,
    last_tx_checksum: u8,
    restore: RestoreSpan,
    pending: Arc<PendingWork>,
    callbacks: callbacks::CallbackTable,
}

impl<M> fmt::Debug for Responder<M>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("memory_size", &self.memory_size())
            .field("backup_buffer_size", &self.backup_buffer_size())
            .field("status", &self.status)
            .field("transfer", &self.transfer)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl Responder<Vec<u8>> {
    /// Build a responder with zeroed memory and backup buffers sized from config
    ///
    /// A `backup_buffer_size` of 0 leaves backups disabled.
    pub fn from_config(config: &ResponderConfig) -> Self {
        let mut responder = Responder::new(vec![0u8; config.memory_size]);

        if config.backup_buffer_size > 0 {
            responder.enable_backups(vec![0u8; config.backup_buffer_size]);
        }

        responder.set_register_mirroring(config.mirror_registers);
        responder
    }
}

impl<M> Responder<M>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Create a responder serving `memory`
    ///
    /// # Examples
    ///
    /// ```
    /// use embedded_comm::responder::Responder;
    /// use embedded_comm::protocol::Status;
    ///
    /// let mut memory = [0u8; 64];
    /// let responder = Responder::new(&mut memory[..]);
    /// assert_eq!(responder.status(), Status::OK);
    /// ```
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            backup: None,
            mirror_registers: false,
            transfer: Transfer::default(),
            status: Status::OK,
            last_tx_checksum: 0,
            restore: RestoreSpan::default(),
            pending: Arc::new(PendingWork::new()),
            callbacks: callbacks::CallbackTable::default(),
        }
    }

    /// Enable memory backups using `backup` as scratch space
    ///
    /// From now on any write longer than the backup buffer is rejected with
    /// `BackupBufferOverflow`.
    pub fn enable_backups(&mut self, backup: M) {
        self.backup = Some(backup);
    }

    /// Builder form of [`Responder::enable_backups`]
    pub fn with_backups(mut self, backup: M) -> Self {
        self.enable_backups(backup);
        self
    }

    /// Copy the status and transmit-checksum registers into memory bytes 0 and 1
    /// at the end of every transaction
    pub fn set_register_mirroring(&mut self, enabled: bool) {
        self.mirror_registers = enabled;
    }

    /// Register a callback run from `process()` after a successful write
    /// touching `range`
    ///
    /// # Errors
    ///
    /// - `InvalidRange` if the range is empty or extends past the memory region
    /// - `TooManyCallbacks` once `MAX_CALLBACKS` are registered
    pub fn on_memory_change<F>(&mut self, range: Range<u32>, callback: F) -> Result<usize>
    where
        F: FnMut(&mut [u8]) + Send + 'static,
    {
        if range.start >= range.end || range.end as usize > self.memory_size() {
            return Err(EmbeddedCommError::InvalidRange(format!(
                "{}..{} (memory size {})",
                range.start,
                range.end,
                self.memory_size()
            )));
        }

        self.callbacks.register(range, Box::new(callback))
    }

    /// Current status register
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns true while a backup restore is waiting for `process()`
    pub fn is_busy(&self) -> bool {
        self.pending.restore_pending()
    }

    /// Handle to the pending-work flags, readable without locking the engine
    pub fn pending(&self) -> Arc<PendingWork> {
        Arc::clone(&self.pending)
    }

    /// Exposed memory region
    pub fn memory(&self) -> &[u8] {
        self.memory.as_ref()
    }

    /// Exposed memory region, mutable (application side)
    pub fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut()
    }

    /// Size of the exposed memory region
    pub fn memory_size(&self) -> usize {
        self.memory.as_ref().len()
    }

    /// Backup buffer size, or `None` with backups disabled
    pub fn backup_buffer_size(&self) -> Option<usize> {
        self.backup.as_ref().map(|backup| backup.as_ref().len())
    }

    /// Handle one byte written by the controller
    pub fn on_byte_received(&mut self, byte: u8) {
        let counter = self.transfer.byte_counter;

        match Phase::of(counter, self.transfer.length) {
            Phase::Length => {
                self.transfer.length |= u32::from(byte) << (8 * counter);
                if counter as usize == FIELD_SIZE - 1 {
                    if let Some(size) = self.backup_buffer_size() {
                        if self.transfer.length as usize > size {
                            self.status.set(Status::BACKUP_BUFFER_OVERFLOW);
                        }
                    }
                }
                self.transfer.checksum = crc8_step(self.transfer.checksum, byte);
            }
            Phase::Address => {
                self.transfer.address |= u32::from(byte) << (8 * (counter - FIELD_SIZE as u32));
                if counter as usize == HEADER_SIZE - 1 && self.range_exceeds_memory() {
                    self.status.set(Status::MEMORY_OUT_OF_RANGE);
                }
                self.transfer.checksum = crc8_step(self.transfer.checksum, byte);
            }
            Phase::Data => {
                self.receive_data(byte);
                self.transfer.checksum = crc8_step(self.transfer.checksum, byte);
            }
            Phase::Checksum => {
                if byte != self.transfer.checksum {
                    self.status.set(Status::DATA_CORRUPTED);
                } else if self.status.is_ok() {
                    let mask = self.callbacks.matching(self.transfer.address, self.transfer.length);
                    self.pending.schedule_callbacks(mask);
                }
            }
            Phase::Drain => {
                self.status.set(Status::INVALID_WRITE);
            }
        }

        self.transfer.byte_counter = counter.saturating_add(1);
    }

    /// Produce the next byte clocked out by the controller
    pub fn on_byte_requested(&mut self) -> u8 {
        let counter = self.transfer.byte_counter;

        let out = match Phase::of(counter, self.transfer.length) {
            Phase::Length | Phase::Address => {
                self.status.set(Status::INVALID_READ);
                0
            }
            Phase::Data => self.serve_data(counter),
            Phase::Checksum => {
                let checksum = self.transfer.checksum;
                self.last_tx_checksum = checksum;
                self.transfer.byte_counter = counter.saturating_add(1);
                return checksum;
            }
            Phase::Drain => return self.finish_transaction(),
        };

        self.transfer.byte_counter = counter.saturating_add(1);
        self.transfer.checksum = crc8_step(self.transfer.checksum, out);
        out
    }

    /// Run deferred work: backup restore first, then memory-change callbacks
    ///
    /// Must be called regularly from outside the byte-handler path.
    pub fn process(&mut self) {
        if self.pending.try_take_pending_restore() {
            self.restore_backup();

            // A transaction in flight keeps Busy until its own end.
            if self.transfer.byte_counter == 0 {
                self.status = Status::OK;
            }
        }

        let mask = self.pending.take_callbacks();
        if mask != 0 {
            let ran = self.callbacks.run(mask, self.memory.as_mut());
            debug!("Ran {} memory change callback(s)", ran);
        }
    }

    /// Drop a half-finished transaction (bus error, timeout)
    pub fn abort_transaction(&mut self) {
        debug!(
            "Aborting transaction at byte {} (length {}, address {})",
            self.transfer.byte_counter, self.transfer.length, self.transfer.address
        );
        self.reset();
    }

    fn range_exceeds_memory(&self) -> bool {
        u64::from(self.transfer.address) + u64::from(self.transfer.length) >= self.memory_size() as u64
    }

    fn receive_data(&mut self, byte: u8) {
        // Bytes after an error are accepted but not applied.
        if !self.status.is_ok() {
            return;
        }

        let offset = (self.transfer.byte_counter as usize) - HEADER_SIZE;
        let write_address = self.transfer.address as usize + offset;

        if write_address >= self.memory_size() {
            self.status.set(Status::MEMORY_OUT_OF_RANGE);
            return;
        }

        let memory = self.memory.as_mut();
        if let Some(backup) = self.backup.as_mut() {
            let backup = backup.as_mut();
            if offset >= backup.len() {
                self.status.set(Status::BACKUP_BUFFER_OVERFLOW);
                return;
            }
            backup[offset] = memory[write_address];
        }

        memory[write_address] = byte;
        self.transfer.applied = offset as u32 + 1;
    }

    fn serve_data(&mut self, counter: u32) -> u8 {
        let read_address = self.transfer.address as usize + (counter as usize - HEADER_SIZE);

        if read_address >= self.memory_size() {
            self.status.set(Status::MEMORY_OUT_OF_RANGE);
            return 0;
        }

        if self.status.is_ok() {
            self.memory.as_ref()[read_address]
        } else {
            0
        }
    }

    /// Emit the terminal status byte and start over
    fn finish_transaction(&mut self) -> u8 {
        if self.status.contains(Status::DATA_CORRUPTED) && self.backup.is_some() && !self.pending.restore_pending() {
            self.restore = RestoreSpan {
                address: self.transfer.address,
                length: self.transfer.applied,
            };
            self.status = Status::BUSY;
            self.pending.arm_restore();
        }

        let out = self.status.bits();
        trace!(
            "Transaction done: length {}, address {}, status 0x{:02X}",
            self.transfer.length,
            self.transfer.address,
            out
        );

        if self.mirror_registers {
            self.write_register(STATUS_REGISTER_ADDRESS, out);
            self.write_register(TX_CHECKSUM_REGISTER_ADDRESS, self.last_tx_checksum);
        }

        self.reset();
        out
    }

    fn write_register(&mut self, address: u32, value: u8) {
        if let Some(slot) = self.memory.as_mut().get_mut(address as usize) {
            *slot = value;
        }
    }

    /// Zero the per-transaction counters. While a restore is pending the status
    /// is re-armed to `Busy` so no new transaction takes effect.
    fn reset(&mut self) {
        self.transfer = Transfer::default();
        self.status = if self.pending.restore_pending() {
            Status::BUSY
        } else {
            Status::OK
        };
    }

    fn restore_backup(&mut self) {
        let RestoreSpan { address, length } = std::mem::take(&mut self.restore);
        let start = address as usize;
        let end = start + length as usize;

        let memory = self.memory.as_mut();
        let Some(backup) = self.backup.as_ref() else {
            return;
        };

        if let (Some(target), Some(saved)) = (memory.get_mut(start..end), backup.as_ref().get(..length as usize)) {
            target.copy_from_slice(saved);
            debug!("Restored {} byte(s) at address {} from backup", length, address);
        }
    }
}

impl<M> ResponderEvents for Responder<M>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    fn on_byte_received(&mut self, byte: u8) {
        Responder::on_byte_received(self, byte);
    }

    fn on_byte_requested(&mut self) -> u8 {
        Responder::on_byte_requested(self)
    }

    fn poll(&mut self) {
        self.process();
    }
}
