//! Node configuration.
//!
//! Everything a node needs is fixed before it starts; [`NodeConfig::validate`]
//! rejects bad parameters up front so nothing is discovered
//! mid-transmission.  The binary fills this in from command-line flags.

use std::time::Duration;

use thiserror::Error;

use crate::aloha::{AlohaPolicy, RetryBackoff};
use crate::frame::{BROADCAST, MAX_PAYLOAD};
use crate::seq::MAX_WINDOW;

/// Retransmission flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqMode {
    /// One outstanding frame per destination; one frame per message.
    StopAndWait,
    /// Sliding window per destination; messages are segmented and closed by
    /// an empty END frame.
    GoBackN { window_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArqConfig {
    pub mode: ArqMode,
    /// How long to wait for an ACK before retransmitting.
    pub timeout: Duration,
    /// Retransmissions after the first send; a frame goes out at most
    /// `1 + max_retries` times.
    pub max_retries: u32,
    pub retry_backoff: RetryBackoff,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            mode: ArqMode::StopAndWait,
            timeout: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: RetryBackoff::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// This node's link address.  Must not be [`BROADCAST`].
    pub address: u8,
    pub arq: ArqConfig,
    pub aloha: AlohaPolicy,
    /// Bytes of `0xAA` ahead of each sync word.
    pub preamble_len: usize,
    /// Payload bytes per DATA frame in Go-Back-N mode.
    pub segment_size: usize,
    /// Largest message accepted for segmentation or reassembly.
    pub max_message_len: usize,
    /// Engine tick; bounds timer latency and shutdown latency.
    pub poll_interval: Duration,
    pub channel_capacity: usize,
    /// Random bytes sent ahead of each new unicast message (0 = off).
    pub training_burst_len: usize,
    /// Seed for the medium-access RNG; `None` draws from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("address {:#04x} is reserved for broadcast", BROADCAST)]
    ReservedAddress,

    #[error("window size {0} outside 1..={max}", max = MAX_WINDOW)]
    InvalidWindow(usize),

    #[error("ALOHA probability {0} outside [0, 1]")]
    InvalidProbability(f64),

    #[error("backoff_min {min:?} exceeds backoff_max {max:?}")]
    InvalidBackoff { min: Duration, max: Duration },

    #[error("ACK timeout must be non-zero")]
    ZeroTimeout,

    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("channel capacity must be non-zero")]
    ZeroCapacity,

    #[error("segment size {0} outside 1..={max}", max = MAX_PAYLOAD)]
    InvalidSegmentSize(usize),

    #[error("max message length must be non-zero")]
    ZeroMessageLimit,
}

impl NodeConfig {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            arq: ArqConfig::default(),
            aloha: AlohaPolicy::default(),
            preamble_len: 4,
            segment_size: MAX_PAYLOAD,
            max_message_len: 64 * 1024,
            poll_interval: Duration::from_millis(10),
            channel_capacity: 64,
            training_burst_len: 0,
            rng_seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address == BROADCAST {
            return Err(ConfigError::ReservedAddress);
        }
        if let ArqMode::GoBackN { window_size } = self.arq.mode {
            if !(1..=MAX_WINDOW).contains(&window_size) {
                return Err(ConfigError::InvalidWindow(window_size));
            }
        }
        let p = self.aloha.probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::InvalidProbability(p));
        }
        if self.aloha.backoff_min > self.aloha.backoff_max {
            return Err(ConfigError::InvalidBackoff {
                min: self.aloha.backoff_min,
                max: self.aloha.backoff_max,
            });
        }
        if self.arq.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !(1..=MAX_PAYLOAD).contains(&self.segment_size) {
            return Err(ConfigError::InvalidSegmentSize(self.segment_size));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::ZeroMessageLimit);
        }
        Ok(())
    }

    /// Largest payload `submit` accepts for `dst`.
    pub fn message_limit(&self, dst: u8) -> usize {
        match self.arq.mode {
            _ if dst == BROADCAST => MAX_PAYLOAD,
            ArqMode::StopAndWait => MAX_PAYLOAD,
            ArqMode::GoBackN { .. } => self.max_message_len,
        }
    }
}
