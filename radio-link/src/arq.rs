//! ARQ state machine shared by both retransmission flavours.
//!
//! ```text
//!                      admit                     ACK (covers last)
//!   Stop-and-Wait: IDLE ─────▶ AWAIT_ACK ────────────────────────▶ IDLE
//!                                 │  ▲ timeout, retries left: resend
//!                                 └──┘
//!                                 │ timeout, budget spent ─▶ FAILED ─▶ IDLE
//!
//!   Go-Back-N:     IDLE ─────▶ WINDOW_ACTIVE ──(window drained)──▶ IDLE
//!                              │  ▲ cumulative ACK: slide, reset timer
//!                              │  │ timeout, retries left: resend ALL
//!                              └──┘
//!                              │ timeout, budget spent ─▶ clear window, FAILED
//! ```
//!
//! [`Arq`] is the per-destination instance the node engine drives.  It never
//! touches the medium: it hands back [`Transmission`]s and outcomes, and the
//! caller does the sending and feedback reporting.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ArqMode;
use crate::frame::{Frame, FrameCodec, FrameError};
use crate::gbn_sender::GbnSender;
use crate::message::{MessageId, Segment};
use crate::sender::StopAndWaitSender;

/// Addressing and encoding shared by every frame sent to one peer.
#[derive(Debug, Clone)]
pub struct Link {
    pub local: u8,
    pub peer: u8,
    pub codec: FrameCodec,
}

impl Link {
    pub fn new(local: u8, peer: u8, codec: FrameCodec) -> Self {
        Self { local, peer, codec }
    }

    pub(crate) fn data_bytes(&self, seq: u8, payload: Vec<u8>) -> Result<Vec<u8>, FrameError> {
        self.codec
            .encode(&Frame::data(self.local, self.peer, seq, payload)?)
    }
}

/// One physical transmission the caller must put on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub seq: u8,
    pub bytes: Vec<u8>,
    pub message: MessageId,
    /// 0 for the first send, `k` for the k-th retry.
    pub attempt: u32,
}

/// Effect of an inbound ACK.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckOutcome {
    /// Frames newly acknowledged; 0 for a stale or unknown ACK.
    pub acked: usize,
    /// Messages whose final frame was covered.
    pub completed: Vec<MessageId>,
    /// Messages whose final frame was covered by an ACK the peer may have
    /// sent without receiving them.
    pub unconfirmed: Vec<MessageId>,
}

/// Effect of a timer expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Retransmit {
        retry: u32,
        frames: Vec<Transmission>,
    },
    GaveUp {
        failed: Vec<MessageId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqState {
    Idle,
    AwaitAck,
    WindowActive,
}

/// Per-destination sender in either flavour.
#[derive(Debug)]
pub enum Arq {
    StopAndWait(StopAndWaitSender),
    GoBackN(GbnSender),
}

impl Arq {
    pub fn new(mode: ArqMode, link: Link, timeout: Duration, max_retries: u32) -> Self {
        match mode {
            ArqMode::StopAndWait => {
                Self::StopAndWait(StopAndWaitSender::new(link, timeout, max_retries))
            }
            ArqMode::GoBackN { window_size } => {
                Self::GoBackN(GbnSender::new(link, window_size, timeout, max_retries))
            }
        }
    }

    pub fn state(&self) -> ArqState {
        match self {
            Self::StopAndWait(s) if s.can_admit() => ArqState::Idle,
            Self::StopAndWait(_) => ArqState::AwaitAck,
            Self::GoBackN(g) if g.in_flight() == 0 => ArqState::Idle,
            Self::GoBackN(_) => ArqState::WindowActive,
        }
    }

    pub fn can_admit(&self) -> bool {
        match self {
            Self::StopAndWait(s) => s.can_admit(),
            Self::GoBackN(g) => g.can_admit(),
        }
    }

    /// Frames awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        match self {
            Self::StopAndWait(s) => usize::from(!s.can_admit()),
            Self::GoBackN(g) => g.in_flight(),
        }
    }

    /// Frame `segment` with the next sequence number and start tracking it.
    /// Check [`can_admit`](Self::can_admit) first.
    pub fn admit(&mut self, segment: Segment, now: Instant) -> Result<Transmission, FrameError> {
        match self {
            Self::StopAndWait(s) => s.admit(segment, now),
            Self::GoBackN(g) => g.admit(segment, now),
        }
    }

    pub fn on_ack(&mut self, seq: u8, now: Instant) -> AckOutcome {
        match self {
            Self::StopAndWait(s) => s.on_ack(seq, now),
            Self::GoBackN(g) => g.on_ack(seq, now),
        }
    }

    /// Check the retransmission timer against `now`.
    pub fn poll(&mut self, now: Instant) -> Option<TimeoutOutcome> {
        match self {
            Self::StopAndWait(s) => s.poll(now),
            Self::GoBackN(g) => g.poll(now),
        }
    }

    /// Restart a running timer once the caller has finished transmitting,
    /// so medium-access deferral does not eat into the ACK timeout.
    pub fn on_sent(&mut self, now: Instant) {
        match self {
            Self::StopAndWait(s) => s.on_sent(now),
            Self::GoBackN(g) => g.on_sent(now),
        }
    }

    /// Drop everything in flight, returning the affected messages.
    pub fn abort(&mut self) -> Vec<MessageId> {
        match self {
            Self::StopAndWait(s) => s.abort(),
            Self::GoBackN(g) => g.abort(),
        }
    }
}
