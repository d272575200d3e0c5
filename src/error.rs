//! # Error Types
//!
//! Custom error types for EmbeddedComm using `thiserror`.
//!
//! Protocol outcomes (bounds violations, corrupted transfers, busy responders)
//! are never errors here: they travel in the status register. This enum only
//! covers failures *around* the protocol: the transport, configuration and
//! host-side setup.

use thiserror::Error;

/// Main error type for EmbeddedComm
#[derive(Debug, Error)]
pub enum EmbeddedCommError {
    /// A transport primitive failed (bus error, NACK, timeout)
    #[error("Transport error: {0}")]
    Transport(std::io::Error),

    /// A transport primitive moved fewer bytes than requested
    #[error("Short transfer: expected {expected} bytes, transport moved {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No device answers at the given peer handle
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Bus address outside the 7-bit range
    #[error("Invalid bus address: 0x{0:02X}")]
    InvalidBusAddress(u8),

    /// Another responder is already attached at this address
    #[error("Bus address 0x{0:02X} already in use")]
    AddressInUse(u8),

    /// Callback table is full
    #[error("Too many memory change callbacks (maximum {0})")]
    TooManyCallbacks(usize),

    /// Address range is empty or falls outside the memory region
    #[error("Invalid memory range: {0}")]
    InvalidRange(String),
}

/// Result type alias for EmbeddedComm
pub type Result<T> = std::result::Result<T, EmbeddedCommError>;
