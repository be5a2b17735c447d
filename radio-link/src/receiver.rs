//! Stop-and-Wait receive-side state machine.
//!
//! A Stop-and-Wait sender never moves to a new sequence number before the
//! old one is acknowledged or abandoned, so remembering the last sequence
//! number accepted from each source is enough to recognise retransmissions.
//! Every DATA frame is ACKed with its own sequence number, duplicates
//! included, because the duplicate usually means our previous ACK was lost.
//!
//! The same filter suppresses repeated broadcast frames.
//!
//! This module only manages state; all medium I/O is the caller's
//! responsibility (same pattern as [`crate::gbn_receiver::GbnReceiver`]).

use std::collections::HashMap;

/// What to do with one inbound DATA frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxVerdict {
    pub ack_seq: u8,
    /// `false` for a duplicate; its payload must not be delivered again.
    pub accepted: bool,
}

#[derive(Debug, Default)]
pub struct StopAndWaitReceiver {
    last_seq: HashMap<u8, u8>,
}

impl StopAndWaitReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data(&mut self, src: u8, seq: u8) -> RxVerdict {
        let duplicate = self.last_seq.get(&src) == Some(&seq);
        if !duplicate {
            self.last_seq.insert(src, seq);
        }
        RxVerdict {
            ack_seq: seq,
            accepted: !duplicate,
        }
    }

    pub fn last_seq(&self, src: u8) -> Option<u8> {
        self.last_seq.get(&src).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_acked_but_not_accepted() {
        let mut rx = StopAndWaitReceiver::new();
        let first = rx.on_data(3, 10);
        let again = rx.on_data(3, 10);

        assert_eq!(first, RxVerdict { ack_seq: 10, accepted: true });
        assert_eq!(again, RxVerdict { ack_seq: 10, accepted: false });
    }

    #[test]
    fn sources_are_tracked_independently() {
        let mut rx = StopAndWaitReceiver::new();
        assert!(rx.on_data(1, 0).accepted);
        assert!(rx.on_data(2, 0).accepted);
        assert!(rx.on_data(1, 1).accepted);
        assert_eq!(rx.last_seq(1), Some(1));
        assert_eq!(rx.last_seq(2), Some(0));
        assert_eq!(rx.last_seq(9), None);
    }

    #[test]
    fn accepts_across_wraparound() {
        let mut rx = StopAndWaitReceiver::new();
        for seq in [254u8, 255, 0, 1] {
            assert!(rx.on_data(5, seq).accepted);
        }
        assert!(!rx.on_data(5, 1).accepted);
    }
}
