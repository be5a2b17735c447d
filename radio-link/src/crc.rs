//! Frame integrity checksums.
//!
//! Two flavours are used on the air and both must agree bit-for-bit with
//! every other node, since there is no negotiation:
//!
//! - **CRC-16/CCITT** (poly `0x1021`, init `0xFFFF`, MSB first, no final
//!   XOR) protects the byte-oriented frame in [`crate::frame`].  It is
//!   table-driven; the 256-entry table is built at compile time.
//! - **CRC-32 bit-string division** (poly `0x104C11DB7`, zero init, no
//!   reflection) protects the legacy profile in [`crate::bitframe`].  It works
//!   on a sequence of bits rather than bytes: the message is extended by 32
//!   zero bits and divided by the generator; the remainder is the checksum.
//!   A message followed by its checksum divides to zero.
//!
//! A mismatch is never an error here, only a `false` from the verify
//! functions.  The frame decoder turns that into "reject as noise".

use std::iter;

/// CCITT generator polynomial (x^16 + x^12 + x^5 + 1).
pub const CRC16_POLY: u16 = 0x1021;

/// Initial register value for CRC-16.
pub const CRC16_INIT: u16 = 0xFFFF;

/// 33-bit generator polynomial for the bit-string CRC-32.
pub const CRC32_POLY: u64 = 0x1_04C1_1DB7;

/// Width of the CRC-32 remainder in bits.
pub const CRC32_BITS: usize = 32;

static CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

// ---------------------------------------------------------------------------
// CRC-16
// ---------------------------------------------------------------------------

/// CRC-16/CCITT over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| {
        let idx = ((crc >> 8) as u8 ^ byte) as usize;
        (crc << 8) ^ CRC16_TABLE[idx]
    })
}

/// `true` when `expected` is the CRC-16 of `data`.
#[inline]
pub fn crc16_verify(data: &[u8], expected: u16) -> bool {
    crc16(data) == expected
}

// ---------------------------------------------------------------------------
// CRC-32 (bit-string)
// ---------------------------------------------------------------------------

/// Remainder of `bits · x^32` divided by [`CRC32_POLY`].
///
/// Bits are taken most-significant first.  Leading zero bits do not change
/// the result, matching a division over the integer value of the bit string.
pub fn crc32_remainder(bits: &[bool]) -> u32 {
    let mut reg: u64 = 0;
    for bit in bits
        .iter()
        .copied()
        .chain(iter::repeat(false).take(CRC32_BITS))
    {
        reg = (reg << 1) | u64::from(bit);
        if reg & (1 << CRC32_BITS) != 0 {
            reg ^= CRC32_POLY;
        }
    }
    reg as u32
}

/// `bits` followed by its 32-bit remainder, ready to transmit.
pub fn crc32_append(bits: &[bool]) -> Vec<bool> {
    let crc = crc32_remainder(bits);
    let mut out = Vec::with_capacity(bits.len() + CRC32_BITS);
    out.extend_from_slice(bits);
    out.extend((0..CRC32_BITS).rev().map(|i| (crc >> i) & 1 == 1));
    out
}

/// `true` when `bits` (data followed by its CRC) divides to a zero remainder.
pub fn crc32_check(bits: &[bool]) -> bool {
    crc32_remainder(bits) == 0
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
