//! # EmbeddedComm Protocol Module
//!
//! Transport-independent pieces shared by both ends of a link.
//!
//! This module handles:
//! - CRC-8 (poly 0x07) checksum calculation, whole-buffer and incremental
//! - The one-byte status register and its flag vocabulary
//! - Frame layout constants and request encoders

pub mod crc;
pub mod frame;
pub mod status;

pub use status::Status;
