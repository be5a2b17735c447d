//! In-process shared radio channel for deterministic testing.
//!
//! Every byte chunk a node transmits is heard by every other attached port,
//! each copy passing independently through a seeded fault model:
//!
//! | Fault         | Description                                           |
//! |---------------|-------------------------------------------------------|
//! | Loss          | The copy is dropped with probability `loss_rate`.     |
//! | Corruption    | One random bit is flipped.                            |
//! | Garbage       | Up to `garbage_max` random bytes arrive first.        |
//! | Fragmentation | The copy arrives in up to `max_fragments` chunks.     |
//! | Duplication   | The copy is delivered twice.                          |
//!
//! There is no collision model: transmissions are serialised through one
//! task in arrival order.  A receiver whose inbound queue is full loses the
//! chunk (receiver overrun) rather than stalling the channel.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::node::PhyPort;

/// Fault model for [`SharedChannel`].  Probabilities are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub duplicate_rate: f64,
    pub fragment_rate: f64,
    pub max_fragments: usize,
    pub garbage_rate: f64,
    pub garbage_max: usize,
    /// Fixed propagation delay applied to every transmission.
    pub latency: Duration,
    /// Per-port queue depth, in chunks.
    pub capacity: usize,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent broadcast medium.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            fragment_rate: 0.0,
            max_fragments: 4,
            garbage_rate: 0.0,
            garbage_max: 8,
            latency: Duration::ZERO,
            capacity: 256,
            seed: 0,
        }
    }
}

/// A broadcast medium shared by any number of [`PhyPort`]s.
///
/// Attach every port first, then [`spawn`](Self::spawn) the channel task.
/// The task ends once every attached port has dropped its sender.
pub struct SharedChannel {
    config: SimulatorConfig,
    uplinks: Vec<mpsc::Receiver<Vec<u8>>>,
    downlinks: Vec<mpsc::Sender<Vec<u8>>>,
}

impl SharedChannel {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            uplinks: Vec::new(),
            downlinks: Vec::new(),
        }
    }

    /// Connect a new port to the medium.
    pub fn attach(&mut self) -> PhyPort {
        let capacity = self.config.capacity.max(1);
        let (up_tx, up_rx) = mpsc::channel(capacity);
        let (down_tx, down_rx) = mpsc::channel(capacity);
        self.uplinks.push(up_rx);
        self.downlinks.push(down_tx);
        PhyPort {
            tx: up_tx,
            rx: down_rx,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let Self {
            config,
            uplinks,
            downlinks,
        } = self;

        // Merge the uplinks, tagging each chunk with its source port.
        let (merged_tx, merged_rx) = mpsc::channel(config.capacity.max(1));
        for (index, mut uplink) in uplinks.into_iter().enumerate() {
            let merged_tx = merged_tx.clone();
            tokio::spawn(async move {
                while let Some(bytes) = uplink.recv().await {
                    if merged_tx.send((index, bytes)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(merged_tx);

        let faults = Faults {
            rng: StdRng::seed_from_u64(config.seed),
            config,
        };
        tokio::spawn(run_channel(merged_rx, downlinks, faults))
    }
}

async fn run_channel(
    mut merged_rx: mpsc::Receiver<(usize, Vec<u8>)>,
    downlinks: Vec<mpsc::Sender<Vec<u8>>>,
    mut faults: Faults,
) {
    while let Some((from, bytes)) = merged_rx.recv().await {
        if !faults.config.latency.is_zero() {
            tokio::time::sleep(faults.config.latency).await;
        }
        for (to, downlink) in downlinks.iter().enumerate() {
            if to == from || downlink.is_closed() {
                continue;
            }
            for chunk in faults.apply(&bytes) {
                if downlink.try_send(chunk).is_err() {
                    log::debug!("[channel] port {to} overrun, chunk lost");
                }
            }
        }
    }
    log::debug!("[channel] all transmitters gone");
}

struct Faults {
    config: SimulatorConfig,
    rng: StdRng,
}

impl Faults {
    fn roll(&mut self, p: f64) -> bool {
        self.rng.random::<f64>() < p
    }

    /// The chunks one receiver hears for one transmission.
    fn apply(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        if self.roll(self.config.loss_rate) {
            return Vec::new();
        }

        let mut copy = Vec::with_capacity(bytes.len() + self.config.garbage_max);
        if self.config.garbage_max > 0 && self.roll(self.config.garbage_rate) {
            let n = self.rng.random_range(1..=self.config.garbage_max);
            let mut noise = vec![0u8; n];
            self.rng.fill_bytes(&mut noise);
            copy.extend_from_slice(&noise);
        }
        let start = copy.len();
        copy.extend_from_slice(bytes);
        if !bytes.is_empty() && self.roll(self.config.corrupt_rate) {
            let index = start + self.rng.random_range(0..bytes.len());
            copy[index] ^= 1u8 << self.rng.random_range(0..8u32);
        }

        let mut chunks = if self.config.max_fragments > 1
            && copy.len() > 1
            && self.roll(self.config.fragment_rate)
        {
            self.fragment(copy)
        } else {
            vec![copy]
        };

        if self.roll(self.config.duplicate_rate) {
            chunks.extend(chunks.clone());
        }
        chunks
    }

    fn fragment(&mut self, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        let pieces = self
            .rng
            .random_range(2..=self.config.max_fragments)
            .min(bytes.len());
        let mut cuts: Vec<usize> = (0..pieces - 1)
            .map(|_| self.rng.random_range(1..bytes.len()))
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut out = Vec::with_capacity(cuts.len() + 1);
        let mut from = 0;
        for cut in cuts {
            out.push(bytes[from..cut].to_vec());
            from = cut;
        }
        out.push(bytes[from..].to_vec());
        out
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn faults(config: SimulatorConfig) -> Faults {
        Faults {
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    #[test]
    fn clean_channel_passes_bytes_through() {
        let mut f = faults(SimulatorConfig::default());
        assert_eq!(f.apply(b"frame"), vec![b"frame".to_vec()]);
    }

    #[test]
    fn fragments_concatenate_to_the_input() {
        let mut f = faults(SimulatorConfig {
            fragment_rate: 1.0,
            max_fragments: 5,
            seed: 11,
            ..SimulatorConfig::default()
        });
        let data: Vec<u8> = (0..40).collect();
        for _ in 0..50 {
            let chunks = f.apply(&data);
            assert!(chunks.len() >= 2 && chunks.len() <= 5);
            assert!(chunks.iter().all(|c| !c.is_empty()));
            assert_eq!(chunks.concat(), data);
        }
    }

    #[test]
    fn corruption_flips_exactly_one_bit() {
        let mut f = faults(SimulatorConfig {
            corrupt_rate: 1.0,
            seed: 5,
            ..SimulatorConfig::default()
        });
        let data = [0u8; 16];
        let out = f.apply(&data).concat();
        let flipped: u32 = out.iter().map(|b| b.count_ones()).sum();
        assert_eq!(flipped, 1);
    }

    #[test]
    fn garbage_precedes_the_payload() {
        let mut f = faults(SimulatorConfig {
            garbage_rate: 1.0,
            garbage_max: 3,
            seed: 9,
            ..SimulatorConfig::default()
        });
        let out = f.apply(b"xyz").concat();
        assert!(out.len() > 3 && out.len() <= 6);
        assert!(out.ends_with(b"xyz"));
    }

    #[test]
    fn total_loss_delivers_nothing() {
        let mut f = faults(SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        });
        assert!(f.apply(b"gone").is_empty());
    }

    #[tokio::test]
    async fn transmission_reaches_every_other_port() {
        let mut channel = SharedChannel::new(SimulatorConfig::default());
        let a = channel.attach();
        let mut b = channel.attach();
        let mut c = channel.attach();
        let task = channel.spawn();

        a.tx.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(b.rx.recv().await.unwrap(), b"hello");
        assert_eq!(c.rx.recv().await.unwrap(), b"hello");

        drop((a, b, c));
        task.await.unwrap();
    }
}
