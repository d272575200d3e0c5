//! # CRC-8 Implementation
//!
//! CRC-8 checksum shared by the controller and responder engines.
//!
//! **Polynomial**: 0x07 (x^8 + x^2 + x + 1), MSB-first, no reflection
//! **Initial Value**: 0x00 (or any previously computed partial checksum)
//!
//! The responder folds one byte at a time from its byte handlers, so the
//! single-step update is the primitive and the buffer helpers are folds over it.

/// CRC-8 polynomial
const CRC8_POLY: u8 = 0x07;

/// Precomputed CRC8 lookup table for fast calculation
const CRC8_TABLE: [u8; 256] = generate_crc8_table();

/// Generate CRC8 lookup table at compile time
const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Fold a single byte into a running CRC8 value
///
/// Constant time, no allocation: safe to call from a byte handler.
///
/// # Arguments
///
/// * `running` - Checksum computed over all previous bytes of the frame
/// * `byte` - Next byte of the frame
///
/// # Returns
///
/// * `u8` - Checksum extended by `byte`
#[inline]
pub fn crc8_step(running: u8, byte: u8) -> u8 {
    CRC8_TABLE[(running ^ byte) as usize]
}

/// Extend a previously computed checksum over a later segment of the same frame
///
/// # Arguments
///
/// * `start_value` - Checksum of the preceding bytes (0 for a fresh frame)
/// * `data` - Bytes to fold in
///
/// # Examples
///
/// ```
/// use embedded_comm::protocol::crc::{crc8, crc8_append};
///
/// let header = [4, 0, 0, 0, 5, 0, 0, 0];
/// let payload = [9, 9, 9, 9];
/// let whole: Vec<u8> = header.iter().chain(payload.iter()).copied().collect();
///
/// assert_eq!(crc8_append(crc8(&header), &payload), crc8(&whole));
/// ```
pub fn crc8_append(start_value: u8, data: &[u8]) -> u8 {
    data.iter().fold(start_value, |crc, &byte| crc8_step(crc, byte))
}

/// Calculate the CRC8 checksum of a complete buffer
///
/// # Arguments
///
/// * `data` - Byte slice to calculate CRC for
///
/// # Returns
///
/// * `u8` - Calculated CRC8 checksum
pub fn crc8(data: &[u8]) -> u8 {
    crc8_append(0, data)
}

/// Bitwise single-byte update (slow, for verification)
///
/// Used primarily for testing the lookup table implementation.
#[allow(dead_code)]
fn crc8_step_bitwise(running: u8, byte: u8) -> u8 {
    let mut crc = running ^ byte;

    for _ in 0..8 {
        if (crc & 0x80) != 0 {
            crc = (crc << 1) ^ CRC8_POLY;
        } else {
            crc <<= 1;
        }
    }

    crc
}
