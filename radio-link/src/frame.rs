//! Wire format of link-layer frames.
//!
//! Every transmission on the shared medium is a [`Frame`].  This module is
//! responsible for:
//! - Serialising a [`Frame`] into a byte buffer ready for the radio.
//! - Locating frames in an arbitrary inbound byte stream by their sync word,
//!   validating the CRC and parsing the header.
//! - Buffering partial input across reads ([`FrameDecoder`]), since the
//!   physical layer may split or merge frames arbitrarily.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//! +----------------+-----------+-----+-----+-----+------+-----+-----------+---------+
//! | preamble (N B) | sync 2D D4| src | dst | seq | type | len | payload   | crc16   |
//! |  0xAA ...      |   2 B     | 1 B | 1 B | 1 B | 1 B  | 1 B | len bytes | 2 B, BE |
//! +----------------+-----------+-----+-----+-----+------+-----+-----------+---------+
//!                               \____________ CRC-16 covers this _________/
//! ```
//!
//! `type` is `0x01` (DATA) or `0x02` (ACK); ACK frames always have `len == 0`.
//! Destination [`BROADCAST`] addresses every node.
//!
//! The sync word can occur inside a payload by coincidence, so it only
//! nominates a candidate.  The CRC decides whether the candidate is a frame.

use std::fmt;

use thiserror::Error;

use crate::crc::crc16;

/// Default receiver-alignment pattern sent ahead of the sync word.
pub const PREAMBLE: [u8; 4] = [0xAA; 4];

/// Byte pattern that anchors the start of a frame header.
pub const SYNC_WORD: [u8; 2] = [0x2D, 0xD4];

/// Destination address that every node accepts.
pub const BROADCAST: u8 = 0xFF;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD: usize = 255;

/// src + dst + seq + type + len.
pub const HEADER_LEN: usize = 5;

pub const CRC_LEN: usize = 2;

/// Shortest possible frame counted from the sync word (empty payload).
pub const MIN_FRAME_LEN: usize = SYNC_WORD.len() + HEADER_LEN + CRC_LEN;

// Offsets within the header (relative to the byte after the sync word).
const OFF_SRC: usize = 0;
const OFF_DST: usize = 1;
const OFF_SEQ: usize = 2;
const OFF_TYPE: usize = 3;
const OFF_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data = 0x01,
    Ack = 0x02,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// Errors raised when building or encoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the {max}-byte length field", max = MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("ACK frames carry no payload (got {0} bytes)")]
    AckWithPayload(usize),
}

/// One link-layer frame, as seen by the protocol (preamble and CRC stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub src: u8,
    pub dst: u8,
    pub seq: u8,
    pub kind: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A DATA frame.  Payloads over [`MAX_PAYLOAD`] bytes are rejected, never
    /// truncated.
    pub fn data(src: u8, dst: u8, seq: u8, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            src,
            dst,
            seq,
            kind: FrameType::Data,
            payload,
        })
    }

    /// An ACK frame acknowledging `seq`.
    pub fn ack(src: u8, dst: u8, seq: u8) -> Self {
        Self {
            src,
            dst,
            seq,
            kind: FrameType::Ack,
            payload: Vec::new(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.dst == BROADCAST
    }

    /// Encode with the default [`PREAMBLE`].
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        FrameCodec::default().encode(self)
    }

    fn validate(&self) -> Result<(), FrameError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        if self.kind == FrameType::Ack && !self.payload.is_empty() {
            return Err(FrameError::AckWithPayload(self.payload.len()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// Encoder carrying the preamble this node puts in front of every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCodec {
    preamble: Vec<u8>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            preamble: PREAMBLE.to_vec(),
        }
    }
}

impl FrameCodec {
    /// A codec whose preamble is `len` bytes of `0xAA`.
    pub fn with_preamble_len(len: usize) -> Self {
        Self {
            preamble: vec![PREAMBLE[0]; len],
        }
    }

    pub fn preamble(&self) -> &[u8] {
        &self.preamble
    }

    /// Serialise `frame` into a newly allocated buffer.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, FrameError> {
        frame.validate()?;
        Ok(self.write(frame))
    }

    /// Serialise an ACK; always valid.
    pub fn encode_ack(&self, src: u8, dst: u8, seq: u8) -> Vec<u8> {
        self.write(&Frame::ack(src, dst, seq))
    }

    fn write(&self, frame: &Frame) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(self.preamble.len() + MIN_FRAME_LEN + frame.payload.len());
        buf.extend_from_slice(&self.preamble);
        buf.extend_from_slice(&SYNC_WORD);

        let body = buf.len();
        buf.extend_from_slice(&[
            frame.src,
            frame.dst,
            frame.seq,
            frame.kind as u8,
            frame.payload.len() as u8,
        ]);
        buf.extend_from_slice(&frame.payload);

        let crc = crc16(&buf[body..]);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Why a sync-word candidate was not accepted as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    /// Checksum mismatch: noise or a coincidental sync word.
    Crc { expected: u16, actual: u16 },
    /// CRC passed but the type byte is neither DATA nor ACK.
    UnknownType(u8),
    /// CRC passed but an ACK carried payload bytes.
    AckWithPayload(usize),
}

impl Reject {
    /// `true` for physical-layer noise, `false` for protocol violations.
    pub fn is_noise(&self) -> bool {
        matches!(self, Self::Crc { .. })
    }
}

impl fmt::Display for Reject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc { expected, actual } => {
                write!(f, "crc mismatch (frame {expected:#06x}, computed {actual:#06x})")
            }
            Self::UnknownType(t) => write!(f, "unknown frame type {t:#04x}"),
            Self::AckWithPayload(n) => write!(f, "ACK with {n}-byte payload"),
        }
    }
}

/// Result of examining the first sync-word candidate in a buffer.
///
/// All offsets are relative to the start of the examined slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// No sync word anywhere; nothing consumed.
    NoSync,
    /// Sync word at `sync_at` but the frame has not fully arrived.
    Incomplete { sync_at: usize },
    /// The candidate failed; drop `discard` bytes and scan again.
    Rejected { reason: Reject, discard: usize },
    /// A valid frame ending at `consumed`.
    Frame { frame: Frame, consumed: usize },
}

/// Examine the first sync-word candidate in `buf`.
///
/// A CRC failure discards only up to one byte past the failed sync word, so
/// a genuine frame overlapping a bogus candidate is still found.  A
/// candidate that passes the CRC but violates the protocol is discarded
/// whole.
pub fn decode(buf: &[u8]) -> Decoded {
    let Some(sync_at) = find_sync(buf) else {
        return Decoded::NoSync;
    };
    let header = &buf[sync_at + SYNC_WORD.len()..];
    if header.len() < HEADER_LEN + CRC_LEN {
        return Decoded::Incomplete { sync_at };
    }

    let len = header[OFF_LEN] as usize;
    let body_len = HEADER_LEN + len;
    if header.len() < body_len + CRC_LEN {
        return Decoded::Incomplete { sync_at };
    }

    let body = &header[..body_len];
    let expected = u16::from_be_bytes([header[body_len], header[body_len + 1]]);
    let actual = crc16(body);
    if actual != expected {
        return Decoded::Rejected {
            reason: Reject::Crc { expected, actual },
            discard: sync_at + 1,
        };
    }

    let consumed = sync_at + SYNC_WORD.len() + body_len + CRC_LEN;
    let kind = match FrameType::from_u8(body[OFF_TYPE]) {
        Some(kind) => kind,
        None => {
            return Decoded::Rejected {
                reason: Reject::UnknownType(body[OFF_TYPE]),
                discard: consumed,
            }
        }
    };
    if kind == FrameType::Ack && len != 0 {
        return Decoded::Rejected {
            reason: Reject::AckWithPayload(len),
            discard: consumed,
        };
    }

    Decoded::Frame {
        frame: Frame {
            src: body[OFF_SRC],
            dst: body[OFF_DST],
            seq: body[OFF_SEQ],
            kind,
            payload: body[HEADER_LEN..].to_vec(),
        },
        consumed,
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(SYNC_WORD.len()).position(|w| w == SYNC_WORD)
}

/// Something the decoder pulled out of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Frame(Frame),
    Rejected(Reject),
}

/// Streaming decoder owning the inbound reassembly buffer.
///
/// ```text
///   push(bytes) ──▶ [ garbage | cand. | cand. | partial ] ──▶ next_event()
/// ```
///
/// Call [`next_event`](Self::next_event) until it returns `None` after each
/// [`push`](Self::push).  The buffer never holds more than one incomplete
/// candidate, so it stays under [`MIN_FRAME_LEN`] + [`MAX_PAYLOAD`] bytes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently held while waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next frame or rejection, or `None` when more input is
    /// needed.
    ///
    /// An incomplete candidate holds the scan until its claimed length has
    /// arrived and its CRC has been checked.  Bytes inside it are never
    /// examined as a frame of their own before then, so a frame carried in
    /// another frame's payload cannot surface.
    pub fn next_event(&mut self) -> Option<DecodeEvent> {
        match decode(&self.buf) {
            Decoded::NoSync => {
                // Keep a trailing byte that may be the first half of a sync word.
                let keep_from = self.buf.len().saturating_sub(SYNC_WORD.len() - 1);
                self.buf.drain(..keep_from);
                None
            }
            Decoded::Incomplete { sync_at } => {
                self.buf.drain(..sync_at);
                None
            }
            Decoded::Rejected { reason, discard } => {
                self.buf.drain(..discard);
                Some(DecodeEvent::Rejected(reason))
            }
            Decoded::Frame { frame, consumed } => {
                self.buf.drain(..consumed);
                Some(DecodeEvent::Frame(frame))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::data(1, 2, 7, b"hello".to_vec()).unwrap()
    }

    fn drain(decoder: &mut FrameDecoder) -> Vec<DecodeEvent> {
        std::iter::from_fn(|| decoder.next_event()).collect()
    }

    #[test]
    fn encode_layout_is_byte_exact() {
        let bytes = Frame::data(0x01, 0x02, 0x07, b"hi".to_vec())
            .unwrap()
            .encode()
            .unwrap();

        let body = [0x01, 0x02, 0x07, 0x01, 0x02, b'h', b'i'];
        let crc = crc16(&body).to_be_bytes();

        let mut expected = vec![0xAA, 0xAA, 0xAA, 0xAA, 0x2D, 0xD4];
        expected.extend_from_slice(&body);
        expected.extend_from_slice(&crc);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn roundtrip_data_and_ack() {
        for frame in [
            sample(),
            Frame::ack(9, 4, 255),
            Frame::data(3, BROADCAST, 0, Vec::new()).unwrap(),
            Frame::data(3, 4, 128, vec![0x5A; MAX_PAYLOAD]).unwrap(),
        ] {
            let bytes = frame.encode().unwrap();
            match decode(&bytes) {
                Decoded::Frame { frame: got, consumed } => {
                    assert_eq!(got, frame);
                    assert_eq!(consumed, bytes.len());
                }
                other => panic!("expected frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn oversized_payload_rejected_not_truncated() {
        let err = Frame::data(1, 2, 0, vec![0; MAX_PAYLOAD + 1]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge(256));

        let mut frame = sample();
        frame.payload = vec![0; 300];
        assert_eq!(frame.encode(), Err(FrameError::PayloadTooLarge(300)));
    }

    #[test]
    fn encoding_ack_with_payload_is_an_error() {
        let mut ack = Frame::ack(1, 2, 3);
        ack.payload.push(0);
        assert_eq!(ack.encode(), Err(FrameError::AckWithPayload(1)));
    }

    #[test]
    fn custom_preamble_length() {
        let codec = FrameCodec::with_preamble_len(32);
        let bytes = codec.encode(&sample()).unwrap();
        assert!(bytes[..32].iter().all(|&b| b == 0xAA));
        assert_eq!(&bytes[32..34], &SYNC_WORD);
    }

    #[test]
    fn no_sync_and_incomplete() {
        assert_eq!(decode(&[0xAA, 0x00, 0x2D]), Decoded::NoSync);

        let bytes = sample().encode().unwrap();
        assert_eq!(
            decode(&bytes[..bytes.len() - 1]),
            Decoded::Incomplete { sync_at: 4 }
        );
        assert_eq!(decode(&bytes[..8]), Decoded::Incomplete { sync_at: 4 });
    }

    #[test]
    fn crc_failure_discards_one_past_sync() {
        let mut bytes = sample().encode().unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0x01;
        match decode(&bytes) {
            Decoded::Rejected { reason, discard } => {
                assert!(matches!(reason, Reject::Crc { .. }));
                assert!(reason.is_noise());
                assert_eq!(discard, 5);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    /// Build raw frame bytes with a valid CRC but arbitrary header fields.
    fn raw(src: u8, dst: u8, seq: u8, kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![src, dst, seq, kind, payload.len() as u8];
        body.extend_from_slice(payload);
        let mut out = SYNC_WORD.to_vec();
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc16(&body).to_be_bytes());
        out
    }

    #[test]
    fn ack_with_payload_is_a_protocol_violation() {
        let bytes = raw(1, 2, 3, 0x02, b"oops");
        assert_eq!(
            decode(&bytes),
            Decoded::Rejected {
                reason: Reject::AckWithPayload(4),
                discard: bytes.len(),
            }
        );
    }

    #[test]
    fn unknown_type_is_a_protocol_violation() {
        let bytes = raw(1, 2, 3, 0x07, b"");
        match decode(&bytes) {
            Decoded::Rejected { reason, .. } => {
                assert_eq!(reason, Reject::UnknownType(0x07));
                assert!(!reason.is_noise());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn sync_word_inside_payload() {
        let frame = Frame::data(1, 2, 3, vec![0x2D, 0xD4, 0x2D, 0xD4, 0x00]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame.encode().unwrap());
        assert_eq!(drain(&mut decoder), [DecodeEvent::Frame(frame)]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn resynchronises_after_garbage_and_corruption() {
        let mut corrupted = Frame::data(4, 2, 1, b"lost".to_vec())
            .unwrap()
            .encode()
            .unwrap();
        corrupted[12] ^= 0x40; // inside the payload

        let valid = sample();
        let mut stream = vec![0x00, 0x13, 0x37, 0x2D, 0x99, 0xD4];
        stream.extend_from_slice(&corrupted);
        stream.extend_from_slice(&valid.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);
        let events = drain(&mut decoder);

        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(events[0], DecodeEvent::Rejected(Reject::Crc { .. })));
        assert_eq!(events[1], DecodeEvent::Frame(valid));
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let a = sample();
        let b = Frame::ack(2, 1, 7);
        let mut stream = a.encode().unwrap();
        stream.extend_from_slice(&b.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in stream {
            decoder.push(&[byte]);
            events.extend(drain(&mut decoder));
        }
        assert_eq!(events, [DecodeEvent::Frame(a), DecodeEvent::Frame(b)]);
    }

    #[test]
    fn bogus_length_holds_the_scan_until_its_crc_fails() {
        // A fake sync word claiming a 200-byte payload, then a real frame.
        let mut stream = vec![0x2D, 0xD4, 1, 2, 3, 0x01, 200];
        let valid = sample();
        stream.extend_from_slice(&valid.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);
        assert!(decoder.next_event().is_none());

        // Enough trailing noise to complete the fake candidate.
        let claimed = SYNC_WORD.len() + HEADER_LEN + 200 + CRC_LEN;
        decoder.push(&vec![0x11; claimed - stream.len()]);
        let events = drain(&mut decoder);
        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(events[0], DecodeEvent::Rejected(Reject::Crc { .. })));
        assert_eq!(events[1], DecodeEvent::Frame(valid));
    }

    #[test]
    fn frame_nested_in_a_payload_is_not_decoded_from_fragments() {
        let inner = Frame::ack(9, 4, 3).encode().unwrap();
        let outer = Frame::data(1, 2, 7, inner).unwrap();
        let bytes = outer.encode().unwrap();

        let mut whole = FrameDecoder::new();
        whole.push(&bytes);
        assert_eq!(drain(&mut whole), [DecodeEvent::Frame(outer.clone())]);

        let mut split = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in &bytes {
            split.push(&[*byte]);
            events.extend(drain(&mut split));
        }
        assert_eq!(events, [DecodeEvent::Frame(outer)]);
        assert_eq!(split.buffered(), 0);
    }

    #[test]
    fn pure_noise_is_not_retained() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x11; 500]);
        assert!(decoder.next_event().is_none());
        assert!(decoder.buffered() <= 1);
    }
}
