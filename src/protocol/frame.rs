//! # Frame Layout and Encoders
//!
//! Wire format of one transaction.
//!
//! ```text
//! write:  length:u32-LE | address:u32-LE | data[length] | crc8       -> status
//! read:   length:u32-LE | address:u32-LE                            -> data[length] | crc8 | status
//! ```
//!
//! The checksum always covers the 8-byte header followed by the data bytes,
//! whichever side produced them.

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::{crc8, crc8_append};

/// Size of the length and address fields in bytes
pub const FIELD_SIZE: usize = 4;

/// Size of the request header (length + address)
pub const HEADER_SIZE: usize = FIELD_SIZE * 2;

/// Checksum size in bytes
pub const CHECKSUM_SIZE: usize = 1;

/// Status register size in bytes
pub const STATUS_SIZE: usize = 1;

/// Conventional location of the status register in responder memory
pub const STATUS_REGISTER_ADDRESS: u32 = 0x0;

/// Conventional location of the transmit-checksum register in responder memory
pub const TX_CHECKSUM_REGISTER_ADDRESS: u32 = 0x1;

/// Request header sent by the controller at the start of every transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestHeader {
    /// Requested transfer size in bytes
    pub length: u32,

    /// Starting offset into the responder's memory
    pub address: u32,
}

impl RequestHeader {
    /// Create a new header
    pub fn new(length: u32, address: u32) -> Self {
        Self { length, address }
    }

    /// Encode as `length LE | address LE`
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..FIELD_SIZE].copy_from_slice(&self.length.to_le_bytes());
        out[FIELD_SIZE..].copy_from_slice(&self.address.to_le_bytes());
        out
    }

    /// Checksum of the encoded header, the starting point for the data phase
    pub fn checksum(&self) -> u8 {
        crc8(&self.encode())
    }

    /// Total number of frame bytes: header + data + checksum
    pub fn frame_len(&self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.length) + CHECKSUM_SIZE as u64
    }
}

/// Position of a byte within a transaction, derived from the byte counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bytes 0..=3, little-endian transfer length
    Length,
    /// Bytes 4..=7, little-endian start address
    Address,
    /// Bytes 8..8+length, payload
    Data,
    /// Byte 8+length, checksum
    Checksum,
    /// Anything beyond the checksum
    Drain,
}

impl Phase {
    /// Classify the byte at `byte_counter` for a transfer of `length` bytes
    pub fn of(byte_counter: u32, length: u32) -> Self {
        let counter = u64::from(byte_counter);
        let data_end = HEADER_SIZE as u64 + u64::from(length);

        if counter < FIELD_SIZE as u64 {
            Phase::Length
        } else if counter < HEADER_SIZE as u64 {
            Phase::Address
        } else if counter < data_end {
            Phase::Data
        } else if counter == data_end {
            Phase::Checksum
        } else {
            Phase::Drain
        }
    }
}

/// Encode a complete write frame
///
/// `data` is zero-padded when shorter than `write_size` and truncated when
/// longer. With `inject_bad_checksum` the trailing checksum is incremented by
/// one, which a responder must detect as corruption.
///
/// # Examples
///
/// ```
/// use embedded_comm::protocol::frame::encode_write_frame;
///
/// let frame = encode_write_frame(5, &[9, 9, 9, 9], 4, false);
/// assert_eq!(frame.len(), 8 + 4 + 1);
/// assert_eq!(&frame[..8], &[4, 0, 0, 0, 5, 0, 0, 0]);
/// ```
pub fn encode_write_frame(address: u32, data: &[u8], write_size: u32, inject_bad_checksum: bool) -> Bytes {
    let header = RequestHeader::new(write_size, address);
    let size = write_size as usize;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + size + CHECKSUM_SIZE);
    frame.put_slice(&header.encode());

    let copied = data.len().min(size);
    frame.put_slice(&data[..copied]);
    frame.put_bytes(0, size - copied);

    let mut checksum = crc8(&frame);
    if inject_bad_checksum {
        checksum = checksum.wrapping_add(1);
    }
    frame.put_u8(checksum);

    frame.freeze()
}

/// Encode the 8-byte request that opens a read transaction
pub fn encode_read_request(address: u32, read_size: u32) -> [u8; HEADER_SIZE] {
    RequestHeader::new(read_size, address).encode()
}

/// Checksum a responder must send after serving `data` for `header`
pub fn read_checksum(header: &RequestHeader, data: &[u8]) -> u8 {
    crc8_append(header.checksum(), data)
}
