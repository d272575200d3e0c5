//! # EmbeddedComm Library
//!
//! Byte-oriented memory access between a controller and one or more
//! responders over a byte-serial link (I2C-like bus, USB CDC, UART).
//!
//! A controller reads and writes a responder's memory region through small
//! framed transactions protected by CRC-8. Every transaction ends with the
//! responder's status register, so faults travel as data instead of errors.
//! Responders can keep a backup of overwritten bytes and roll a corrupted
//! write back from their cooperative loop.

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod responder;
pub mod transport;

pub use controller::{Controller, ControllerOptions};
pub use error::{EmbeddedCommError, Result};
pub use protocol::Status;
pub use responder::{Responder, SharedResponder};
