//! Medium access: p-persistent ALOHA.
//!
//! Every physical transmission (first sends, retransmissions and ACKs alike)
//! passes through [`Medium::transmit`].  With probability `p` the frame goes
//! out immediately; otherwise the sender waits a random time drawn from
//! `[backoff_min, backoff_max]` and then sends unconditionally.  There is
//! no carrier sensing and no collision detection.
//!
//! The [`Medium`] is owned by a single node task, so physical
//! transmissions are serialised by construction: only one is ever in flight.
//! Frames are handed to the phy channel whole.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Parameters of the p-persistent ALOHA policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlohaPolicy {
    /// Probability of transmitting without deferral, in `[0, 1]`.
    pub probability: f64,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for AlohaPolicy {
    fn default() -> Self {
        Self {
            probability: 0.3,
            backoff_min: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
        }
    }
}

/// Outcome of one access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Immediate,
    Deferred(Duration),
}

impl AlohaPolicy {
    /// A policy that never defers.
    pub fn always() -> Self {
        Self {
            probability: 1.0,
            backoff_min: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> Access {
        if rng.random::<f64>() < self.probability {
            Access::Immediate
        } else {
            Access::Deferred(self.backoff(rng))
        }
    }

    fn backoff<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = self.backoff_min.as_secs_f64();
        let hi = self.backoff_max.as_secs_f64();
        if hi <= lo {
            return self.backoff_min;
        }
        Duration::from_secs_f64(rng.random_range(lo..=hi))
    }
}

/// Extra pause before a retransmission burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryBackoff {
    #[default]
    None,
    /// Before the k-th retry wait `R × slot`, `R` uniform in
    /// `[0, 2^min(k, max_exponent))`.
    BinaryExponential { slot: Duration, max_exponent: u32 },
}

impl RetryBackoff {
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::BinaryExponential { slot, max_exponent } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                let k = attempt.min(max_exponent).min(31);
                let slots = rng.random_range(0..1u32 << k);
                slot.checked_mul(slots).unwrap_or(Duration::MAX)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Medium
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MediumError {
    #[error("shutdown requested while waiting for the medium")]
    Shutdown,

    #[error("physical layer channel closed")]
    Closed,
}

/// The single writer onto the physical layer.
#[derive(Debug)]
pub struct Medium {
    phy_tx: mpsc::Sender<Vec<u8>>,
    policy: AlohaPolicy,
    retry_backoff: RetryBackoff,
    rng: StdRng,
}

impl Medium {
    pub fn new(
        phy_tx: mpsc::Sender<Vec<u8>>,
        policy: AlohaPolicy,
        retry_backoff: RetryBackoff,
        rng: StdRng,
    ) -> Self {
        Self {
            phy_tx,
            policy,
            retry_backoff,
            rng,
        }
    }

    /// Apply the ALOHA policy, then hand `bytes` to the physical layer.
    ///
    /// A shutdown during the backoff, or while the phy channel is full,
    /// abandons the frame before any of it is written.
    pub async fn transmit(
        &mut self,
        bytes: Vec<u8>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Access, MediumError> {
        let access = self.policy.decide(&mut self.rng);
        if let Access::Deferred(delay) = access {
            log::trace!("[aloha] deferring {delay:?}");
            sleep_or_shutdown(delay, shutdown).await?;
        }
        if *shutdown.borrow() {
            return Err(MediumError::Shutdown);
        }
        tokio::select! {
            res = self.phy_tx.send(bytes) => res.map_err(|_| MediumError::Closed)?,
            _ = shutdown.changed() => return Err(MediumError::Shutdown),
        }
        Ok(access)
    }

    /// Wait out the retry backoff before the `attempt`-th retransmission.
    pub async fn retry_pause(
        &mut self,
        attempt: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), MediumError> {
        let delay = self.retry_backoff.delay(attempt, &mut self.rng);
        if delay.is_zero() {
            return Ok(());
        }
        log::debug!("[aloha] retry {attempt}: backing off {delay:?}");
        sleep_or_shutdown(delay, shutdown).await
    }

    /// `len` random bytes to precede a frame.
    pub fn training_burst(&mut self, len: usize) -> Vec<u8> {
        let mut burst = vec![0u8; len];
        self.rng.fill_bytes(&mut burst);
        burst
    }
}

async fn sleep_or_shutdown(
    delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), MediumError> {
    if *shutdown.borrow() {
        return Err(MediumError::Shutdown);
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = shutdown.changed() => Err(MediumError::Shutdown),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn immediate_fraction_converges_to_p() {
        let mut rng = StdRng::seed_from_u64(42);
        for p in [0.1, 0.3, 0.75] {
            let policy = AlohaPolicy {
                probability: p,
                ..AlohaPolicy::default()
            };
            let trials = 20_000;
            let immediate = (0..trials)
                .filter(|_| policy.decide(&mut rng) == Access::Immediate)
                .count();
            let fraction = immediate as f64 / trials as f64;
            assert!((fraction - p).abs() < 0.02, "p={p} observed {fraction}");
        }
    }

    #[test]
    fn deferral_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = AlohaPolicy {
            probability: 0.0,
            backoff_min: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
        };
        for _ in 0..1000 {
            match policy.decide(&mut rng) {
                Access::Deferred(d) => {
                    assert!(d >= policy.backoff_min && d <= policy.backoff_max, "{d:?}")
                }
                Access::Immediate => panic!("p = 0 must always defer"),
            }
        }
    }

    #[test]
    fn probability_one_never_defers() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..1000).all(|_| AlohaPolicy::always().decide(&mut rng) == Access::Immediate));
    }

    #[test]
    fn binary_exponential_window_grows() {
        let mut rng = StdRng::seed_from_u64(3);
        let backoff = RetryBackoff::BinaryExponential {
            slot: Duration::from_millis(10),
            max_exponent: 3,
        };
        assert_eq!(backoff.delay(0, &mut rng), Duration::ZERO);
        for attempt in 1..6 {
            let cap = 1u32 << attempt.min(3);
            for _ in 0..200 {
                let d = backoff.delay(attempt, &mut rng);
                assert!(d < Duration::from_millis(10) * cap);
            }
        }
        assert_eq!(RetryBackoff::None.delay(4, &mut rng), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_transmission_waits_then_sends() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_stop, mut shutdown) = watch::channel(false);
        let policy = AlohaPolicy {
            probability: 0.0,
            backoff_min: Duration::from_millis(200),
            backoff_max: Duration::from_millis(200),
        };
        let mut medium = Medium::new(tx, policy, RetryBackoff::None, StdRng::seed_from_u64(0));

        let start = tokio::time::Instant::now();
        let access = medium.transmit(vec![1, 2, 3], &mut shutdown).await.unwrap();
        assert_eq!(access, Access::Deferred(Duration::from_millis(200)));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(rx.recv().await, Some(vec![1, 2, 3]));
    }

    #[test]
    fn huge_slot_saturates_instead_of_overflowing() {
        let mut rng = StdRng::seed_from_u64(5);
        let backoff = RetryBackoff::BinaryExponential {
            slot: Duration::MAX / 2,
            max_exponent: 6,
        };
        for _ in 0..100 {
            let d = backoff.delay(6, &mut rng);
            assert!(d == Duration::ZERO || d >= Duration::MAX / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_phy_is_full_abandons_the_frame() {
        let (tx, mut rx) = mpsc::channel(1);
        let (stop, mut shutdown) = watch::channel(false);
        let mut medium = Medium::new(
            tx,
            AlohaPolicy::always(),
            RetryBackoff::None,
            StdRng::seed_from_u64(0),
        );
        medium.transmit(vec![1], &mut shutdown).await.unwrap();

        let send = medium.transmit(vec![2], &mut shutdown);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(send, trigger);

        assert_eq!(result, Err(MediumError::Shutdown));
        assert_eq!(rx.recv().await, Some(vec![1]));
        drop(medium);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_writes_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let (stop, mut shutdown) = watch::channel(false);
        let policy = AlohaPolicy {
            probability: 0.0,
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(5),
        };
        let mut medium = Medium::new(tx, policy, RetryBackoff::None, StdRng::seed_from_u64(0));

        let send = medium.transmit(vec![9; 16], &mut shutdown);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(send, trigger);

        assert_eq!(result, Err(MediumError::Shutdown));
        drop(medium);
        assert_eq!(rx.recv().await, None);
    }
}
