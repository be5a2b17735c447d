//! Stop-and-Wait send-side state machine.
//!
//! [`StopAndWaitSender`] tracks the single outstanding frame for one
//! destination.  A new sequence number is only used once the previous frame
//! is acknowledged or its retry budget is spent, so the receiver can detect
//! duplicates by comparing against the last sequence number it accepted.
//!
//! A frame is transmitted at most `1 + max_retries` times.
//!
//! This module only manages state; all medium I/O is the caller's
//! responsibility.

use std::time::Duration;

use tokio::time::Instant;

use crate::arq::{AckOutcome, Link, TimeoutOutcome, Transmission};
use crate::frame::FrameError;
use crate::message::{MessageId, Segment};
use crate::seq::seq_next;
use crate::timer::RetransmitTimer;

/// The frame currently awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct Outstanding {
    pub seq: u8,
    /// Encoded frame, resent verbatim on retry.
    pub bytes: Vec<u8>,
    pub message: MessageId,
    pub last: bool,
    /// Total transmissions so far.
    pub tx_count: u32,
}

#[derive(Debug)]
pub struct StopAndWaitSender {
    link: Link,
    next_seq: u8,
    outstanding: Option<Outstanding>,
    timer: RetransmitTimer,
}

impl StopAndWaitSender {
    pub fn new(link: Link, timeout: Duration, max_retries: u32) -> Self {
        Self {
            link,
            next_seq: 0,
            outstanding: None,
            timer: RetransmitTimer::new(timeout, max_retries),
        }
    }

    /// Start numbering at `seq` instead of 0.
    pub fn with_initial_seq(mut self, seq: u8) -> Self {
        self.next_seq = seq;
        self
    }

    pub fn can_admit(&self) -> bool {
        self.outstanding.is_none()
    }

    pub fn next_seq(&self) -> u8 {
        self.next_seq
    }

    pub fn outstanding(&self) -> Option<&Outstanding> {
        self.outstanding.as_ref()
    }

    pub fn admit(&mut self, segment: Segment, now: Instant) -> Result<Transmission, FrameError> {
        debug_assert!(self.can_admit(), "admit while a frame is outstanding");

        let seq = self.next_seq;
        let bytes = self.link.data_bytes(seq, segment.payload)?;
        self.next_seq = seq_next(seq);

        self.outstanding = Some(Outstanding {
            seq,
            bytes: bytes.clone(),
            message: segment.message,
            last: segment.last,
            tx_count: 1,
        });
        self.timer.reset_retries();
        self.timer.arm(now);

        Ok(Transmission {
            seq,
            bytes,
            message: segment.message,
            attempt: 0,
        })
    }

    /// Accept an ACK from the peer.  Only an ACK carrying the outstanding
    /// sequence number counts; anything else is stale.
    pub fn on_ack(&mut self, seq: u8, _now: Instant) -> AckOutcome {
        if self.outstanding.as_ref().map(|o| o.seq) != Some(seq) {
            return AckOutcome::default();
        }
        let Some(done) = self.outstanding.take() else {
            return AckOutcome::default();
        };
        self.timer.disarm();
        AckOutcome {
            acked: 1,
            completed: if done.last { vec![done.message] } else { Vec::new() },
            ..AckOutcome::default()
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<TimeoutOutcome> {
        if !self.timer.expired(now) {
            return None;
        }

        if !self.timer.record_retry() {
            let failed = self.outstanding.take().map(|o| o.message);
            self.timer.disarm();
            return Some(TimeoutOutcome::GaveUp {
                failed: failed.into_iter().collect(),
            });
        }

        let retry = self.timer.retries();
        let out = self.outstanding.as_mut()?;
        out.tx_count += 1;
        let frame = Transmission {
            seq: out.seq,
            bytes: out.bytes.clone(),
            message: out.message,
            attempt: retry,
        };
        self.timer.arm(now);
        Some(TimeoutOutcome::Retransmit {
            retry,
            frames: vec![frame],
        })
    }

    pub fn on_sent(&mut self, now: Instant) {
        self.timer.rearm_if_armed(now);
    }

    pub fn abort(&mut self) -> Vec<MessageId> {
        self.timer.disarm();
        self.outstanding.take().map(|o| o.message).into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameCodec;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn sender(max_retries: u32) -> StopAndWaitSender {
        StopAndWaitSender::new(Link::new(1, 2, FrameCodec::default()), TIMEOUT, max_retries)
    }

    fn msg(id: u64) -> Segment {
        Segment {
            message: MessageId(id),
            payload: format!("message {id}").into_bytes(),
            last: true,
        }
    }

    #[test]
    fn ack_on_first_attempt_delivers_with_one_transmission() {
        let t0 = Instant::now();
        let mut s = sender(3);

        let tx = s.admit(msg(1), t0).unwrap();
        assert_eq!(tx.seq, 0);

        let outcome = s.on_ack(0, t0 + TIMEOUT / 2);
        assert_eq!(outcome.acked, 1);
        assert_eq!(outcome.completed, [MessageId(1)]);
        assert!(s.can_admit());
        assert!(s.poll(t0 + TIMEOUT * 10).is_none());
    }

    #[test]
    fn exhaustion_sends_max_retries_plus_one() {
        let max_retries = 3;
        let mut now = Instant::now();
        let mut s = sender(max_retries);

        let first = s.admit(msg(7), now).unwrap();
        let mut transmissions = 1;

        loop {
            now += TIMEOUT;
            match s.poll(now) {
                Some(TimeoutOutcome::Retransmit { frames, .. }) => {
                    assert_eq!(frames.len(), 1);
                    assert_eq!(frames[0].bytes, first.bytes);
                    transmissions += frames.len();
                }
                Some(TimeoutOutcome::GaveUp { failed }) => {
                    assert_eq!(failed, [MessageId(7)]);
                    break;
                }
                None => panic!("timer should have fired"),
            }
        }

        assert_eq!(transmissions, max_retries as usize + 1);
        assert!(s.can_admit());
    }

    #[test]
    fn retry_restarts_the_timer() {
        let t0 = Instant::now();
        let mut s = sender(3);
        s.admit(msg(1), t0).unwrap();

        assert!(s.poll(t0 + TIMEOUT / 2).is_none());
        assert!(s.poll(t0 + TIMEOUT).is_some());
        assert!(s.poll(t0 + TIMEOUT + TIMEOUT / 2).is_none());
        assert_eq!(s.outstanding().unwrap().tx_count, 2);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let t0 = Instant::now();
        let mut s = sender(3);
        s.admit(msg(1), t0).unwrap();
        s.on_ack(0, t0);
        s.admit(msg(2), t0).unwrap();

        assert_eq!(s.on_ack(0, t0), AckOutcome::default());
        assert!(!s.can_admit());
        assert_eq!(s.on_ack(1, t0).completed, [MessageId(2)]);
    }

    #[test]
    fn sequence_wraps_after_255() {
        let t0 = Instant::now();
        let mut s = sender(3).with_initial_seq(254);

        let mut seen = Vec::new();
        for id in 0..4 {
            let tx = s.admit(msg(id), t0).unwrap();
            seen.push(tx.seq);
            assert_eq!(s.on_ack(tx.seq, t0).acked, 1);
        }
        assert_eq!(seen, [254, 255, 0, 1]);
        assert_eq!(s.next_seq(), 2);
    }

    #[test]
    fn on_sent_pushes_the_deadline_back() {
        let t0 = Instant::now();
        let mut s = sender(1);
        s.admit(msg(1), t0).unwrap();

        // Medium access deferred the send by 150 ms.
        s.on_sent(t0 + Duration::from_millis(150));
        assert!(s.poll(t0 + TIMEOUT).is_none());
        assert!(s.poll(t0 + TIMEOUT + Duration::from_millis(150)).is_some());
    }
}
