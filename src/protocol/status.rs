//! # Status Register
//!
//! One-byte flag register reported by a responder at the end of every
//! transaction.
//!
//! ```text
//! bit 7  Ok                   (reserved "nothing pending" value)
//! bit 5  Busy                 (deferred restore pending)
//! bit 4  DataCorrupted
//! bit 3  InvalidWrite
//! bit 2  InvalidRead
//! bit 1  BackupBufferOverflow
//! bit 0  MemoryOutOfRange
//! ```
//!
//! `Ok` never coexists with any other bit. Value `0` is never produced by a
//! responder; it is reserved as the "indeterminate" outcome of a failed
//! transport call.

use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// Status register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Status(u8);

impl Status {
    /// Indeterminate outcome (transport failed, no byte was received)
    pub const INDETERMINATE: Status = Status(0);

    /// Memory address or transfer range falls outside the memory region
    pub const MEMORY_OUT_OF_RANGE: Status = Status(1);

    /// Write larger than the backup buffer while backups are enabled
    pub const BACKUP_BUFFER_OVERFLOW: Status = Status(2);

    /// Controller read before supplying length and address
    pub const INVALID_READ: Status = Status(4);

    /// Controller kept writing when it should have read the status byte
    pub const INVALID_WRITE: Status = Status(8);

    /// Checksum mismatch
    pub const DATA_CORRUPTED: Status = Status(16);

    /// Responder has deferred work pending, poll again
    pub const BUSY: Status = Status(32);

    /// No condition pending
    pub const OK: Status = Status(128);

    /// Every flag other than `Ok`, in bit order
    const FLAGS: [(Status, &'static str); 6] = [
        (Status::MEMORY_OUT_OF_RANGE, "MemoryOutOfRange"),
        (Status::BACKUP_BUFFER_OVERFLOW, "BackupBufferOverflow"),
        (Status::INVALID_READ, "InvalidRead"),
        (Status::INVALID_WRITE, "InvalidWrite"),
        (Status::DATA_CORRUPTED, "DataCorrupted"),
        (Status::BUSY, "Busy"),
    ];

    /// Build a status from a raw byte as received on the wire
    pub const fn from_bits(bits: u8) -> Self {
        Status(bits)
    }

    /// Raw register byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Set a flag, keeping the register invariant
    ///
    /// Setting `Ok` clears every other bit. Setting any other flag clears `Ok`
    /// and ORs the flag in.
    pub fn set(&mut self, flag: Status) {
        if flag == Status::OK {
            self.0 = Status::OK.0;
            return;
        }

        self.0 = (self.0 & !Status::OK.0) | flag.0;
    }

    /// Returns true if every bit of `flag` is set
    pub const fn contains(self, flag: Status) -> bool {
        flag.0 != 0 && (self.0 & flag.0) == flag.0
    }

    /// Returns true for exactly `Ok`
    pub const fn is_ok(self) -> bool {
        self.0 == Status::OK.0
    }

    /// Returns true if a deferred operation is pending
    pub const fn is_busy(self) -> bool {
        self.contains(Status::BUSY)
    }

    /// Returns true for the transport-failure sentinel
    pub const fn is_indeterminate(self) -> bool {
        self.0 == 0
    }

    /// Returns true if any error bit (not `Ok`, not `Busy`) is set
    pub const fn has_errors(self) -> bool {
        (self.0 & !(Status::OK.0 | Status::BUSY.0)) != 0
    }

    /// Names of the flags set in this register
    pub fn flag_names(self) -> Vec<&'static str> {
        if self.is_ok() {
            return vec!["Ok"];
        }

        Status::FLAGS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Collapse a controller result into a single status byte
    ///
    /// Any error becomes [`Status::INDETERMINATE`], matching the one-byte
    /// contract where a failed transport call reads as `0`.
    pub fn or_indeterminate(result: Result<Status>) -> Status {
        result.unwrap_or(Status::INDETERMINATE)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::OK
    }
}

impl From<u8> for Status {
    fn from(bits: u8) -> Self {
        Status(bits)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_indeterminate() {
            return write!(f, "Indeterminate (0x00)");
        }

        write!(f, "{} (0x{:02X})", self.flag_names().join("|"), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddedCommError;

    #[test]
    fn test_flag_values() {
        assert_eq!(Status::MEMORY_OUT_OF_RANGE.bits(), 1);
        assert_eq!(Status::BACKUP_BUFFER_OVERFLOW.bits(), 2);
        assert_eq!(Status::INVALID_READ.bits(), 4);
        assert_eq!(Status::INVALID_WRITE.bits(), 8);
        assert_eq!(Status::DATA_CORRUPTED.bits(), 16);
        assert_eq!(Status::BUSY.bits(), 32);
        assert_eq!(Status::OK.bits(), 128);
    }

    #[test]
    fn test_setting_error_clears_ok() {
        let mut status = Status::OK;
        status.set(Status::DATA_CORRUPTED);

        assert!(!status.is_ok());
        assert!(status.contains(Status::DATA_CORRUPTED));
        assert!(!status.contains(Status::OK));
        assert_eq!(status.bits(), 16);
    }

    #[test]
    fn test_errors_accumulate() {
        let mut status = Status::OK;
        status.set(Status::MEMORY_OUT_OF_RANGE);
        status.set(Status::INVALID_WRITE);

        assert_eq!(status.bits(), 9);
        assert!(status.has_errors());
    }

    #[test]
    fn test_setting_ok_resets_everything() {
        let mut status = Status::OK;
        status.set(Status::MEMORY_OUT_OF_RANGE);
        status.set(Status::BUSY);
        status.set(Status::OK);

        assert_eq!(status, Status::OK);

        // Idempotent
        status.set(Status::OK);
        assert_eq!(status, Status::OK);
    }

    #[test]
    fn test_busy_is_not_an_error() {
        let mut status = Status::OK;
        status.set(Status::BUSY);

        assert!(status.is_busy());
        assert!(!status.has_errors());
        assert!(!status.is_ok());
    }

    #[test]
    fn test_contains_zero_flag_is_false() {
        assert!(!Status::OK.contains(Status::INDETERMINATE));
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::OK.to_string(), "Ok (0x80)");
        assert_eq!(Status::from_bits(0x11).to_string(), "MemoryOutOfRange|DataCorrupted (0x11)");
        assert_eq!(Status::INDETERMINATE.to_string(), "Indeterminate (0x00)");
    }

    #[test]
    fn test_or_indeterminate() {
        assert_eq!(Status::or_indeterminate(Ok(Status::BUSY)), Status::BUSY);

        let failed = Err(EmbeddedCommError::ShortTransfer { expected: 1, actual: 0 });
        assert_eq!(Status::or_indeterminate(failed), Status::INDETERMINATE);
    }
}
