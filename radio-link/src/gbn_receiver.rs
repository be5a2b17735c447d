//! Go-Back-N receive-side state machine.
//!
//! [`GbnReceiver`] implements the receiver side of Go-Back-N, per source:
//!
//! - Only **in-order** frames are accepted (`seq == expected`); accepting
//!   one advances `expected` and ACKs `seq`.
//! - Out-of-order and duplicate frames are discarded without touching
//!   state, and re-ACK the last in-order frame (`expected - 1`, which is
//!   255 before anything has been accepted).
//! - Accepted payloads are appended to a per-source buffer; an empty
//!   payload is the END marker and releases the buffered message.
//!
//! This module only manages state; all medium I/O is the caller's
//! responsibility (same pattern as [`crate::receiver::StopAndWaitReceiver`]).

use std::collections::HashMap;

use crate::seq::{seq_next, seq_prev};

/// What to do with one inbound DATA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbnVerdict {
    pub ack_seq: u8,
    pub accepted: bool,
    /// A complete message, released by an accepted END frame.
    pub message: Option<Vec<u8>>,
    /// The partial message outgrew the limit and is being dropped.
    pub overflowed: bool,
}

#[derive(Debug, Default)]
struct SourceState {
    expected: u8,
    partial: Vec<u8>,
    discarding: bool,
}

#[derive(Debug)]
pub struct GbnReceiver {
    sources: HashMap<u8, SourceState>,
    max_message_len: usize,
}

impl GbnReceiver {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            sources: HashMap::new(),
            max_message_len,
        }
    }

    /// Next sequence number expected from `src`.
    pub fn expected(&self, src: u8) -> u8 {
        self.sources.get(&src).map_or(0, |s| s.expected)
    }

    pub fn on_data(&mut self, src: u8, seq: u8, payload: &[u8]) -> GbnVerdict {
        let state = self.sources.entry(src).or_default();

        if seq != state.expected {
            return GbnVerdict {
                ack_seq: seq_prev(state.expected),
                accepted: false,
                message: None,
                overflowed: false,
            };
        }
        state.expected = seq_next(seq);

        let mut verdict = GbnVerdict {
            ack_seq: seq,
            accepted: true,
            message: None,
            overflowed: false,
        };

        if payload.is_empty() {
            let message = std::mem::take(&mut state.partial);
            if !std::mem::replace(&mut state.discarding, false) {
                verdict.message = Some(message);
            }
        } else if state.discarding {
            // Still inside an oversized message; wait for its END.
        } else if state.partial.len() + payload.len() > self.max_message_len {
            state.partial.clear();
            state.discarding = true;
            verdict.overflowed = true;
        } else {
            state.partial.extend_from_slice(payload);
        }
        verdict
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_frames_advance_and_ack_themselves() {
        let mut rx = GbnReceiver::new(1024);
        let v = rx.on_data(2, 0, b"ab");
        assert!(v.accepted);
        assert_eq!(v.ack_seq, 0);
        assert_eq!(v.message, None);
        assert_eq!(rx.expected(2), 1);
    }

    #[test]
    fn out_of_order_reacks_last_good() {
        let mut rx = GbnReceiver::new(1024);

        // Nothing accepted yet: the re-ACK wraps to 255.
        let v = rx.on_data(2, 1, b"early");
        assert!(!v.accepted);
        assert_eq!(v.ack_seq, 255);
        assert_eq!(rx.expected(2), 0);

        rx.on_data(2, 0, b"x");
        let v = rx.on_data(2, 2, b"gap");
        assert_eq!(v.ack_seq, 0);
        assert_eq!(rx.expected(2), 1);
    }

    #[test]
    fn duplicate_gives_two_acks_one_delivery() {
        let mut rx = GbnReceiver::new(1024);
        rx.on_data(7, 0, b"hello");

        let first = rx.on_data(7, 1, b"");
        let dup = rx.on_data(7, 1, b"");

        assert_eq!(first.message.as_deref(), Some(&b"hello"[..]));
        assert_eq!(first.ack_seq, 1);
        assert!(!dup.accepted);
        assert_eq!(dup.message, None);
        assert_eq!(dup.ack_seq, 1);
    }

    #[test]
    fn reassembles_segments_on_end() {
        let mut rx = GbnReceiver::new(1024);
        for (seq, chunk) in [(0u8, &b"seg"[..]), (1, b"ment"), (2, b"ed")] {
            assert_eq!(rx.on_data(1, seq, chunk).message, None);
        }
        assert_eq!(rx.on_data(1, 3, b"").message, Some(b"segmented".to_vec()));

        // An END straight after an END is an empty message.
        assert_eq!(rx.on_data(1, 4, b"").message, Some(Vec::new()));
    }

    #[test]
    fn sources_do_not_interfere() {
        let mut rx = GbnReceiver::new(1024);
        rx.on_data(1, 0, b"one");
        rx.on_data(2, 0, b"two");
        assert_eq!(rx.on_data(2, 1, b"").message, Some(b"two".to_vec()));
        assert_eq!(rx.on_data(1, 1, b"").message, Some(b"one".to_vec()));
    }

    #[test]
    fn sequence_continues_across_wrap() {
        let mut rx = GbnReceiver::new(1024);
        for seq in 0..=255u8 {
            assert!(rx.on_data(4, seq, b"z").accepted);
        }
        assert_eq!(rx.expected(4), 0);
        assert!(rx.on_data(4, 0, b"").accepted);
        assert_eq!(rx.on_data(4, 0, b"").ack_seq, 0);
    }

    #[test]
    fn oversized_message_is_dropped_whole() {
        let mut rx = GbnReceiver::new(4);
        assert!(!rx.on_data(1, 0, b"abc").overflowed);
        assert!(rx.on_data(1, 1, b"de").overflowed);
        assert!(rx.on_data(1, 2, b"f").accepted);

        let end = rx.on_data(1, 3, b"");
        assert!(end.accepted);
        assert_eq!(end.message, None);

        rx.on_data(1, 4, b"ok");
        assert_eq!(rx.on_data(1, 5, b"").message, Some(b"ok".to_vec()));
    }
}
