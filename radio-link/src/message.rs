//! Application-facing message types.
//!
//! The upward interface of a node is three channels: submissions in,
//! deliveries out, and one [`Feedback`] per submitted message.  This module
//! holds those types, the segmentation used by Go-Back-N mode, and the
//! `dst:body` text format spoken by the CLI.

use std::fmt;

use thiserror::Error;

/// Identifier handed back by `submit`, echoed in the matching [`Feedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request to send `payload` to `dst`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub id: MessageId,
    pub dst: u8,
    pub payload: Vec<u8>,
}

/// One frame's worth of a message, queued for the ARQ engine.
///
/// `last` marks the frame whose acknowledgement completes the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub message: MessageId,
    pub payload: Vec<u8>,
    pub last: bool,
}

/// Cut `payload` into `size`-byte DATA segments followed by an empty END
/// segment.  An empty message is the END segment alone.
pub fn segment(message: MessageId, payload: &[u8], size: usize) -> Vec<Segment> {
    let mut out: Vec<Segment> = payload
        .chunks(size.max(1))
        .map(|chunk| Segment {
            message,
            payload: chunk.to_vec(),
            last: false,
        })
        .collect();
    out.push(Segment {
        message,
        payload: Vec::new(),
        last: true,
    });
    out
}

/// A message received from `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub src: u8,
    pub payload: Vec<u8>,
    pub broadcast: bool,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[From Node {}]: {}",
            self.src,
            String::from_utf8_lossy(&self.payload)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The peer acknowledged the whole message.
    Delivered,
    /// Retry budget exhausted, or the node shut down first.
    Failed,
    /// Broadcast: sent once, nobody acknowledges.
    Unacknowledged,
}

/// Exactly one per submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    pub id: MessageId,
    pub dst: u8,
    pub outcome: DeliveryOutcome,
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.outcome {
            DeliveryOutcome::Delivered => "TRUE",
            DeliveryOutcome::Failed => "FALSE",
            DeliveryOutcome::Unacknowledged => "SENT",
        })
    }
}

// ---------------------------------------------------------------------------
// Text format
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected `dst:body`")]
    MissingSeparator,

    #[error("`{0}` is not a node address (0-255)")]
    BadAddress(String),
}

/// Parse a `dst:body` line.  The body may itself contain colons.
pub fn parse_addressed(line: &str) -> Result<(u8, Vec<u8>), ParseError> {
    let (dst, body) = line.split_once(':').ok_or(ParseError::MissingSeparator)?;
    let dst = dst.trim();
    let dst = dst
        .parse::<u8>()
        .map_err(|_| ParseError::BadAddress(dst.to_string()))?;
    Ok((dst, body.as_bytes().to_vec()))
}
