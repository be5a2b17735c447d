//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] maintains a sliding window of up to `N` in-flight frames for
//! one destination.  Unlike stop-and-wait, multiple frames may be
//! outstanding simultaneously.
//!
//! # Protocol contract
//!
//! - At most `window_size` frames may be in flight at once.
//! - ACKs are **cumulative**: an ACK for `s` acknowledges every frame in the
//!   window up to and including `s`, even if earlier ACKs were lost.
//! - One timer covers the window and restarts whenever the window slides.
//! - On timeout the **whole** window is retransmitted (go back N); once the
//!   retry budget is spent the window is cleared and every message with a
//!   frame in it fails.
//! - Sequence numbers are `u8` and wrap; all comparisons go through
//!   [`crate::seq`], which is unambiguous for windows below 128.
//! - After a give-up the receiver may still be waiting on a frame from the
//!   abandoned window, re-ACKing the one before it.  Until an ACK arrives
//!   that can only come from accepting a newer frame, every ACK value such
//!   a re-ACK could carry is ambiguous: messages it covers are reported as
//!   unconfirmed, never completed.
//!
//! This module only manages state; all medium I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::arq::{AckOutcome, Link, TimeoutOutcome, Transmission};
use crate::frame::FrameError;
use crate::message::{MessageId, Segment};
use crate::seq::{seq_distance, seq_in_window, seq_next, seq_prev, MAX_WINDOW};

const SEQ_SPACE: usize = 256;
use crate::timer::RetransmitTimer;

// ---------------------------------------------------------------------------
// GbnEntry
// ---------------------------------------------------------------------------

/// A single in-flight frame occupying one slot in the window.
#[derive(Debug, Clone)]
pub struct GbnEntry {
    pub seq: u8,
    /// The encoded frame, ready to hand to the medium.
    pub bytes: Vec<u8>,
    pub message: MessageId,
    /// Acknowledging this entry completes `message`.
    pub last: bool,
    /// Total number of times this frame has been transmitted.
    pub tx_count: u32,
}

// ---------------------------------------------------------------------------
// GbnSender
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state for one destination.
///
/// ```text
///   base                next_seq
///     │                    │
///  ───┼────────────────────┼──────────────────▶ seq space (mod 256)
///     │ <─── in flight ───▶│ <── admittable ──▶
/// ```
#[derive(Debug)]
pub struct GbnSender {
    link: Link,
    next_seq: u8,
    window_size: usize,
    /// Ordered oldest first; sequence numbers are contiguous.
    window: VecDeque<GbnEntry>,
    timer: RetransmitTimer,
    /// ACK values the peer may still be repeating from before a give-up.
    stale: Option<StaleAcks>,
    /// Messages with a frame slid out of the window by an ambiguous ACK.
    tainted: Vec<MessageId>,
}

/// Contiguous run of `len` ACK values starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StaleAcks {
    start: u8,
    len: usize,
}

impl StaleAcks {
    fn contains(&self, seq: u8) -> bool {
        seq_in_window(self.start, self.len, seq)
    }
}

impl GbnSender {
    /// `window_size` must be in `1..=127`; [`crate::config::NodeConfig`]
    /// validates it before a node starts.
    pub fn new(link: Link, window_size: usize, timeout: Duration, max_retries: u32) -> Self {
        debug_assert!((1..=MAX_WINDOW).contains(&window_size));
        Self {
            link,
            next_seq: 0,
            window_size,
            window: VecDeque::with_capacity(window_size),
            timer: RetransmitTimer::new(timeout, max_retries),
            stale: None,
            tainted: Vec::new(),
        }
    }

    /// Start numbering at `seq` instead of 0.
    pub fn with_initial_seq(mut self, seq: u8) -> Self {
        self.next_seq = seq;
        self
    }

    /// `true` when there is room for at least one more in-flight frame.
    pub fn can_admit(&self) -> bool {
        self.window.len() < self.window_size
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// Sequence number of the oldest unacknowledged frame (or `next_seq`
    /// when idle).
    pub fn base(&self) -> u8 {
        self.window.front().map_or(self.next_seq, |e| e.seq)
    }

    pub fn next_seq(&self) -> u8 {
        self.next_seq
    }

    /// Iterate over in-flight frames from oldest to newest.
    pub fn window_entries(&self) -> impl Iterator<Item = &GbnEntry> {
        self.window.iter()
    }

    pub fn admit(&mut self, segment: Segment, now: Instant) -> Result<Transmission, FrameError> {
        debug_assert!(
            self.can_admit(),
            "admit on a full GBN window ({} / {})",
            self.window.len(),
            self.window_size
        );

        let seq = self.next_seq;
        let bytes = self.link.data_bytes(seq, segment.payload)?;
        self.next_seq = seq_next(seq);

        // The timer tracks the base; start it when the first frame enters.
        if self.window.is_empty() {
            self.timer.reset_retries();
            self.timer.arm(now);
        }
        self.window.push_back(GbnEntry {
            seq,
            bytes: bytes.clone(),
            message: segment.message,
            last: segment.last,
            tx_count: 1,
        });

        Ok(Transmission {
            seq,
            bytes,
            message: segment.message,
            attempt: 0,
        })
    }

    /// Process a cumulative ACK.
    ///
    /// ACKs outside the window (duplicates of older frames, or sequence
    /// numbers never sent) acknowledge nothing.
    pub fn on_ack(&mut self, seq: u8, now: Instant) -> AckOutcome {
        let base = self.base();
        if !seq_in_window(base, self.window.len(), seq) {
            self.narrow_stale(seq);
            return AckOutcome::default();
        }

        let acked = seq_distance(base, seq) as usize + 1;
        let entries: Vec<GbnEntry> = self.window.drain(..acked).collect();

        // Frames up to the receiver's position before this ACK may never
        // have been accepted.  That position is somewhere in the stale run.
        let unconfirmed = match self.stale {
            None => 0,
            Some(stale) if stale.contains(seq) => {
                self.narrow_stale(seq);
                entries.len()
            }
            Some(stale) => {
                self.stale = None;
                entries
                    .iter()
                    .rposition(|e| stale.contains(e.seq))
                    .map_or(0, |i| i + 1)
            }
        };

        let mut outcome = AckOutcome {
            acked,
            ..AckOutcome::default()
        };
        for (i, entry) in entries.into_iter().enumerate() {
            if i < unconfirmed && !self.tainted.contains(&entry.message) {
                self.tainted.push(entry.message);
            }
            if !entry.last {
                continue;
            }
            match self.tainted.iter().position(|&m| m == entry.message) {
                Some(at) => {
                    self.tainted.swap_remove(at);
                    outcome.unconfirmed.push(entry.message);
                }
                None => outcome.completed.push(entry.message),
            }
        }

        if self.window.is_empty() {
            self.timer.disarm();
        } else {
            // Restart for the new oldest frame.
            self.timer.reset_retries();
            self.timer.arm(now);
        }

        outcome
    }

    /// An out-of-window ACK inside the stale run is the peer re-ACKing its
    /// last in-order frame, so its position is at least that far along.
    fn narrow_stale(&mut self, seq: u8) {
        if let Some(stale) = self.stale.as_mut() {
            if stale.contains(seq) {
                stale.len -= seq_distance(stale.start, seq) as usize;
                stale.start = seq;
            }
        }
    }

    /// Record the ACK values the peer may repeat after the current window
    /// is abandoned.
    fn mark_stale(&mut self) {
        let last = seq_prev(self.next_seq);
        let stale = match self.stale {
            Some(stale) => {
                let end = stale.start.wrapping_add((stale.len - 1) as u8);
                StaleAcks {
                    start: stale.start,
                    len: (stale.len + seq_distance(end, last) as usize).min(SEQ_SPACE),
                }
            }
            None => {
                let start = seq_prev(self.base());
                StaleAcks {
                    start,
                    len: seq_distance(start, last) as usize + 1,
                }
            }
        };
        self.stale = Some(stale);
    }

    pub fn poll(&mut self, now: Instant) -> Option<TimeoutOutcome> {
        if !self.timer.expired(now) {
            return None;
        }

        if !self.timer.record_retry() {
            self.mark_stale();
            let failed = self.abort();
            return Some(TimeoutOutcome::GaveUp { failed });
        }

        let retry = self.timer.retries();
        let frames = self
            .window
            .iter_mut()
            .map(|entry| {
                entry.tx_count += 1;
                Transmission {
                    seq: entry.seq,
                    bytes: entry.bytes.clone(),
                    message: entry.message,
                    attempt: retry,
                }
            })
            .collect();
        self.timer.arm(now);
        Some(TimeoutOutcome::Retransmit { retry, frames })
    }

    pub fn on_sent(&mut self, now: Instant) {
        self.timer.rearm_if_armed(now);
    }

    /// Clear the window.  Returns each message with a frame in it, once, in
    /// window order.
    pub fn abort(&mut self) -> Vec<MessageId> {
        self.timer.disarm();
        let mut failed: Vec<MessageId> = Vec::new();
        for entry in self.window.drain(..) {
            if !failed.contains(&entry.message) {
                failed.push(entry.message);
            }
        }
        self.tainted.retain(|m| !failed.contains(m));
        failed
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
