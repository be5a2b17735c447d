//! Legacy bit-oriented frame profile protected by the bit-string CRC-32.
//!
//! Used for file-transfer style experiments where a message is cut into
//! fixed 64-bit chunks.  Not interoperable with [`crate::frame`]; a node
//! speaks one profile or the other.
//!
//! ```text
//!  bit 0      2             8                               72              104
//!  +----------+-------------+--------------------------------+---------------+
//!  | addr (2) |  seq (6)    |        payload chunk (64)      |   CRC-32 (32) |
//!  +----------+-------------+--------------------------------+---------------+
//! ```
//!
//! A message is laid out as `data bits ‖ zero padding ‖ 12-bit data length`
//! so that the whole run is a multiple of 64 bits, then split into chunks.
//! Sequence numbers wrap modulo 64.

use thiserror::Error;

use crate::crc::{crc32_append, crc32_check};

pub const ADDR_BITS: usize = 2;
pub const SEQ_BITS: usize = 6;
pub const CHUNK_BITS: usize = 64;
pub const SIZE_BITS: usize = 12;

/// Bits covered by the CRC.
const HEADER_AND_CHUNK_BITS: usize = ADDR_BITS + SEQ_BITS + CHUNK_BITS;

pub const FRAME_BITS: usize = HEADER_AND_CHUNK_BITS + 32;
pub const FRAME_BYTES: usize = FRAME_BITS / 8;

/// Longest message the 12-bit trailer can describe.
pub const MAX_MESSAGE_BITS: usize = (1 << SIZE_BITS) - 1;

const SEQ_MASK: u8 = (1 << SEQ_BITS) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitFrameError {
    #[error("address {0} does not fit in {bits} bits", bits = ADDR_BITS)]
    AddressOutOfRange(u8),

    #[error("message of {0} bits exceeds the {max}-bit size field", max = MAX_MESSAGE_BITS)]
    MessageTooLong(usize),

    #[error("expected {n} bytes, got {0}", n = FRAME_BYTES)]
    WrongLength(usize),

    #[error("CRC-32 check failed")]
    Crc,

    #[error("size trailer claims {claimed} bits but only {available} arrived")]
    BadTrailer { claimed: usize, available: usize },
}

/// One 104-bit frame of the legacy profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitFrame {
    pub address: u8,
    pub seq: u8,
    pub chunk: u64,
}

impl BitFrame {
    /// `seq` is reduced modulo 64.
    pub fn new(address: u8, seq: u8, chunk: u64) -> Result<Self, BitFrameError> {
        if usize::from(address) >= 1 << ADDR_BITS {
            return Err(BitFrameError::AddressOutOfRange(address));
        }
        Ok(Self {
            address,
            seq: seq & SEQ_MASK,
            chunk,
        })
    }

    /// The frame as transmitted: header, chunk and CRC, MSB first.
    pub fn to_bits(&self) -> Vec<bool> {
        let mut bits = Vec::with_capacity(HEADER_AND_CHUNK_BITS);
        push_bits(&mut bits, u64::from(self.address), ADDR_BITS);
        push_bits(&mut bits, u64::from(self.seq), SEQ_BITS);
        push_bits(&mut bits, self.chunk, CHUNK_BITS);
        crc32_append(&bits)
    }

    pub fn encode(&self) -> [u8; FRAME_BYTES] {
        let mut out = [0u8; FRAME_BYTES];
        for (i, byte) in pack_bits(&self.to_bits()).into_iter().enumerate() {
            out[i] = byte;
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BitFrameError> {
        if bytes.len() != FRAME_BYTES {
            return Err(BitFrameError::WrongLength(bytes.len()));
        }
        let bits = unpack_bits(bytes);
        if !crc32_check(&bits) {
            return Err(BitFrameError::Crc);
        }
        Ok(Self {
            address: read_bits(&bits[..ADDR_BITS]) as u8,
            seq: read_bits(&bits[ADDR_BITS..ADDR_BITS + SEQ_BITS]) as u8,
            chunk: read_bits(&bits[ADDR_BITS + SEQ_BITS..HEADER_AND_CHUNK_BITS]),
        })
    }
}

/// Split `message` into frames addressed to `address`, numbering from
/// `first_seq`.
pub fn packetize(
    message: &[u8],
    address: u8,
    first_seq: u8,
) -> Result<Vec<BitFrame>, BitFrameError> {
    let data_bits = message.len() * 8;
    if data_bits > MAX_MESSAGE_BITS {
        return Err(BitFrameError::MessageTooLong(data_bits));
    }

    let total = (data_bits + SIZE_BITS).div_ceil(CHUNK_BITS) * CHUNK_BITS;
    let mut bits = unpack_bits(message);
    bits.resize(total - SIZE_BITS, false);
    push_bits(&mut bits, data_bits as u64, SIZE_BITS);

    bits.chunks(CHUNK_BITS)
        .enumerate()
        .map(|(i, chunk)| BitFrame::new(address, first_seq.wrapping_add(i as u8), read_bits(chunk)))
        .collect()
}

/// Rebuild a message from its frames, in order.
pub fn reassemble(frames: &[BitFrame]) -> Result<Vec<u8>, BitFrameError> {
    let mut bits = Vec::with_capacity(frames.len() * CHUNK_BITS);
    for frame in frames {
        push_bits(&mut bits, frame.chunk, CHUNK_BITS);
    }
    if bits.len() < SIZE_BITS {
        return Err(BitFrameError::BadTrailer {
            claimed: 0,
            available: 0,
        });
    }

    let available = bits.len() - SIZE_BITS;
    let claimed = read_bits(&bits[available..]) as usize;
    if claimed > available {
        return Err(BitFrameError::BadTrailer { claimed, available });
    }
    Ok(pack_bits(&bits[..claimed]))
}

// ---------------------------------------------------------------------------
// Bit helpers (MSB first)
// ---------------------------------------------------------------------------

fn push_bits(out: &mut Vec<bool>, value: u64, width: usize) {
    out.extend((0..width).rev().map(|i| (value >> i) & 1 == 1));
}

fn read_bits(bits: &[bool]) -> u64 {
    bits.iter().fold(0, |acc, &b| (acc << 1) | u64::from(b))
}

fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .collect()
}

/// Pack bits into bytes; a trailing partial byte is zero-filled.
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | (u8::from(b) << (7 - i)))
        })
        .collect()
}
