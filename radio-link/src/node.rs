//! Node engine: one task per node, driving every layer below the application.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ submit(dst, payload)        ▲ deliveries     ▲ feedback
//!      ▼                             │                │
//!  NodeHandle ── mpsc ──▶ ┌──────────┴────────────────┴───────┐
//!                         │  engine task (tokio::select!)     │
//!                         │   ├── per-peer Arq + send queue   │
//!                         │   ├── S&W / GBN receive state     │
//!                         │   ├── FrameDecoder                │
//!                         │   └── Medium (p-persistent ALOHA) │
//!                         └──────────┬────────────────────────┘
//!                                    │ PhyPort (raw bytes)
//!                                    ▼
//!                      SharedChannel / UdpPhy / test harness
//! ```
//!
//! The engine is the only writer onto the phy, so at most one physical
//! transmission is ever in progress.  Senders are kept per destination; a
//! stalled peer never holds up traffic to another.
//!
//! Shutdown is cooperative: the flag is checked between steps and while
//! waiting on the medium, and the engine reports `Failed` for anything it
//! was still holding.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::aloha::{Access, Medium, MediumError};
use crate::arq::{Arq, Link, TimeoutOutcome, Transmission};
use crate::config::{ArqMode, ConfigError, NodeConfig};
use crate::frame::{
    DecodeEvent, Frame, FrameCodec, FrameDecoder, FrameType, Reject, BROADCAST,
};
use crate::gbn_receiver::GbnReceiver;
use crate::message::{segment, Delivery, DeliveryOutcome, Feedback, MessageId, Outbound, Segment};
use crate::receiver::StopAndWaitReceiver;
use crate::seq::seq_next;
use crate::stats::{LinkStats, StatsHandle, StatsRecorder};

// ---------------------------------------------------------------------------
// Physical port
// ---------------------------------------------------------------------------

/// Raw byte interface to whatever carries frames: a simulated channel, a
/// UDP socket or a radio driver.  Chunks need not align with frames.
#[derive(Debug)]
pub struct PhyPort {
    pub tx: mpsc::Sender<Vec<u8>>,
    pub rx: mpsc::Receiver<Vec<u8>>,
}

impl PhyPort {
    /// Two ports wired back to back.
    pub fn pair(capacity: usize) -> (PhyPort, PhyPort) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            PhyPort { tx: a_tx, rx: a_rx },
            PhyPort { tx: b_tx, rx: b_rx },
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot send to own address {0}")]
    SelfAddressed(u8),

    #[error("message of {len} bytes exceeds the {limit}-byte limit for this destination")]
    MessageTooLarge { len: usize, limit: usize },

    #[error("node has stopped")]
    Stopped,
}

/// Why the engine loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Shutdown,
    PhyClosed,
}

impl From<MediumError> for Halt {
    fn from(e: MediumError) -> Self {
        match e {
            MediumError::Shutdown => Halt::Shutdown,
            MediumError::Closed => Halt::PhyClosed,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// Application side of a running node, returned by [`spawn`].
pub struct NodeHandle {
    /// Messages received from other nodes, in delivery order.
    pub deliveries: mpsc::Receiver<Delivery>,

    /// One entry per submitted message once its fate is known.
    pub feedback: mpsc::Receiver<Feedback>,

    config: NodeConfig,
    submit_tx: mpsc::Sender<Outbound>,
    next_id: AtomicU64,
    stats: StatsHandle,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn address(&self) -> u8 {
        self.config.address
    }

    /// Queue `payload` for `dst` ([`BROADCAST`] for everyone).
    ///
    /// Returns the id that the matching [`Feedback`] will carry.  Waits when
    /// the submission queue is full.
    pub async fn submit(
        &self,
        dst: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Result<MessageId, NodeError> {
        let payload = payload.into();
        if dst == self.config.address {
            return Err(NodeError::SelfAddressed(dst));
        }
        let limit = self.config.message_limit(dst);
        if payload.len() > limit {
            return Err(NodeError::MessageTooLarge {
                len: payload.len(),
                limit,
            });
        }

        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.submit_tx
            .send(Outbound { id, dst, payload })
            .await
            .map_err(|_| NodeError::Stopped)?;
        Ok(id)
    }

    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Stop the engine and wait for it to finish.
    ///
    /// Anything still queued or in flight is reported as failed on
    /// [`feedback`](Self::feedback) (best effort) before the task exits, so
    /// the receivers stay readable afterwards.  Idempotent.
    pub async fn shutdown(&mut self) -> LinkStats {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[node {}] engine task failed: {e}", self.config.address);
            }
        }
        self.stats.snapshot()
    }
}

/// Validate `config` and start a node on `phy`.  Must be called from within
/// a tokio runtime.
pub fn spawn(config: NodeConfig, phy: PhyPort) -> Result<NodeHandle, NodeError> {
    config.validate()?;

    let capacity = config.channel_capacity;
    let (submit_tx, app_rx) = mpsc::channel(capacity);
    let (delivery_tx, deliveries) = mpsc::channel(capacity);
    let (feedback_tx, feedback) = mpsc::channel(capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (recorder, stats) = StatsRecorder::new();

    let rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let medium = Medium::new(phy.tx, config.aloha, config.arq.retry_backoff, rng);

    let inbound = match config.arq.mode {
        ArqMode::StopAndWait => Inbound::StopAndWait(StopAndWaitReceiver::new()),
        ArqMode::GoBackN { .. } => Inbound::GoBackN(GbnReceiver::new(config.max_message_len)),
    };

    let engine = Engine {
        address: config.address,
        codec: FrameCodec::with_preamble_len(config.preamble_len),
        config: config.clone(),
        decoder: FrameDecoder::new(),
        peers: BTreeMap::new(),
        inbound,
        broadcast_rx: StopAndWaitReceiver::new(),
        broadcast_seq: 0,
        broadcast_queue: VecDeque::new(),
        last_burst: None,
        medium,
        stats: recorder,
        phy_rx: phy.rx,
        app_rx,
        deliveries: delivery_tx,
        feedback: feedback_tx,
        shutdown: shutdown_rx,
    };
    let task = tokio::spawn(engine.run());

    Ok(NodeHandle {
        deliveries,
        feedback,
        config,
        submit_tx,
        next_id: AtomicU64::new(1),
        stats,
        shutdown_tx,
        task: Some(task),
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Outbound state toward one destination.
struct Peer {
    arq: Arq,
    queue: VecDeque<Segment>,
}

/// Unicast receive state; the flavour follows the configured ARQ mode.
enum Inbound {
    StopAndWait(StopAndWaitReceiver),
    GoBackN(GbnReceiver),
}

struct Engine {
    address: u8,
    config: NodeConfig,
    codec: FrameCodec,
    decoder: FrameDecoder,
    peers: BTreeMap<u8, Peer>,
    inbound: Inbound,
    /// Broadcast frames are de-duplicated but never acknowledged.
    broadcast_rx: StopAndWaitReceiver,
    broadcast_seq: u8,
    broadcast_queue: VecDeque<Outbound>,
    /// Message that last received a training burst.
    last_burst: Option<MessageId>,
    medium: Medium,
    stats: StatsRecorder,
    phy_rx: mpsc::Receiver<Vec<u8>>,
    app_rx: mpsc::Receiver<Outbound>,
    deliveries: mpsc::Sender<Delivery>,
    feedback: mpsc::Sender<Feedback>,
    shutdown: watch::Receiver<bool>,
}

impl Engine {
    async fn run(mut self) {
        log::info!(
            "[node {}] up: {:?}, p={}",
            self.address,
            self.config.arq.mode,
            self.config.aloha.probability
        );

        match self.event_loop().await {
            Halt::Shutdown => log::info!("[node {}] shutdown requested", self.address),
            Halt::PhyClosed => log::warn!("[node {}] physical layer closed", self.address),
        }

        self.fail_pending();
        log::info!("[node {}] stopped\n{}", self.address, self.stats.snapshot());
    }

    async fn event_loop(&mut self) -> Halt {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepting = true;

        loop {
            let step = tokio::select! {
                biased;

                _ = self.shutdown.changed() => Err(Halt::Shutdown),

                _ = tick.tick() => self.poll_timers().await,

                maybe = self.phy_rx.recv() => match maybe {
                    Some(bytes) => self.on_bytes(&bytes).await,
                    None => Err(Halt::PhyClosed),
                },

                maybe = self.app_rx.recv(), if accepting => {
                    match maybe {
                        Some(out) => self.enqueue(out),
                        None => {
                            log::debug!("[node {}] submission channel closed", self.address);
                            accepting = false;
                        }
                    }
                    Ok(())
                }
            };

            if let Err(halt) = step {
                return halt;
            }
            if let Err(halt) = self.pump_outbound().await {
                return halt;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn enqueue(&mut self, out: Outbound) {
        log::debug!(
            "[node {}] queued {} for {} ({} bytes)",
            self.address,
            out.id,
            out.dst,
            out.payload.len()
        );
        if out.dst == BROADCAST {
            self.broadcast_queue.push_back(out);
            return;
        }

        let segments = match self.config.arq.mode {
            ArqMode::StopAndWait => vec![Segment {
                message: out.id,
                payload: out.payload,
                last: true,
            }],
            ArqMode::GoBackN { .. } => segment(out.id, &out.payload, self.config.segment_size),
        };
        self.peer_mut(out.dst).queue.extend(segments);
    }

    fn peer_mut(&mut self, dst: u8) -> &mut Peer {
        let (mode, timeout, retries) = (
            self.config.arq.mode,
            self.config.arq.timeout,
            self.config.arq.max_retries,
        );
        let link = Link::new(self.address, dst, self.codec.clone());
        self.peers.entry(dst).or_insert_with(|| Peer {
            arq: Arq::new(mode, link, timeout, retries),
            queue: VecDeque::new(),
        })
    }

    /// Move queued work onto the medium while windows have room.
    async fn pump_outbound(&mut self) -> Result<(), Halt> {
        while let Some(out) = self.broadcast_queue.pop_front() {
            self.send_broadcast(out).await?;
        }

        let dsts: Vec<u8> = self.peers.keys().copied().collect();
        for dst in dsts {
            loop {
                let Some(peer) = self.peers.get_mut(&dst) else {
                    break;
                };
                if !peer.arq.can_admit() {
                    break;
                }
                let Some(seg) = peer.queue.pop_front() else {
                    break;
                };
                let message = seg.message;

                match peer.arq.admit(seg, Instant::now()) {
                    Ok(tx) => {
                        let starts_window = peer.arq.in_flight() == 1;
                        self.send_data(tx).await?;
                        if starts_window {
                            self.rearm(dst);
                        }
                    }
                    Err(e) => {
                        log::warn!("[node {}] cannot frame {message}: {e}", self.address);
                        self.purge(dst, message);
                        self.report(message, dst, DeliveryOutcome::Failed).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn send_broadcast(&mut self, out: Outbound) -> Result<(), Halt> {
        let seq = self.broadcast_seq;
        self.broadcast_seq = seq_next(seq);

        let encoded = Frame::data(self.address, BROADCAST, seq, out.payload)
            .and_then(|frame| self.codec.encode(&frame));
        match encoded {
            Ok(bytes) => {
                self.transmit(bytes).await?;
                self.stats.record(|s| s.packets_sent += 1);
                log::debug!("[node {}] → broadcast seq={seq} {}", self.address, out.id);
                self.report(out.id, BROADCAST, DeliveryOutcome::Unacknowledged)
                    .await
            }
            Err(e) => {
                log::warn!("[node {}] cannot frame broadcast {}: {e}", self.address, out.id);
                self.report(out.id, BROADCAST, DeliveryOutcome::Failed).await
            }
        }
    }

    async fn send_data(&mut self, tx: Transmission) -> Result<(), Halt> {
        let mut bytes = tx.bytes;
        let burst_len = self.config.training_burst_len;
        if tx.attempt == 0 && burst_len > 0 && self.last_burst != Some(tx.message) {
            let mut burst = self.medium.training_burst(burst_len);
            burst.extend_from_slice(&bytes);
            bytes = burst;
            self.last_burst = Some(tx.message);
        }

        self.transmit(bytes).await?;
        self.stats.record(|s| {
            s.packets_sent += 1;
            if tx.attempt > 0 {
                s.retransmissions += 1;
            }
        });
        log::debug!(
            "[node {}] → DATA seq={} {} attempt={}",
            self.address,
            tx.seq,
            tx.message,
            tx.attempt
        );
        Ok(())
    }

    async fn send_ack(&mut self, dst: u8, seq: u8) -> Result<(), Halt> {
        let bytes = self.codec.encode_ack(self.address, dst, seq);
        self.transmit(bytes).await?;
        self.stats.record(|s| s.acks_sent += 1);
        log::trace!("[node {}] → ACK {seq} to {dst}", self.address);
        Ok(())
    }

    async fn transmit(&mut self, bytes: Vec<u8>) -> Result<(), Halt> {
        let access = self.medium.transmit(bytes, &mut self.shutdown).await?;
        if let Access::Deferred(_) = access {
            self.stats.record(|s| s.aloha_deferrals += 1);
        }
        Ok(())
    }

    /// Restart `dst`'s timer now that the medium is free again.
    fn rearm(&mut self, dst: u8) {
        if let Some(peer) = self.peers.get_mut(&dst) {
            peer.arq.on_sent(Instant::now());
        }
    }

    /// Drop queued segments of a message that can no longer be delivered.
    fn purge(&mut self, dst: u8, message: MessageId) {
        if let Some(peer) = self.peers.get_mut(&dst) {
            peer.queue.retain(|seg| seg.message != message);
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    async fn poll_timers(&mut self) -> Result<(), Halt> {
        let dsts: Vec<u8> = self.peers.keys().copied().collect();
        for dst in dsts {
            let Some(peer) = self.peers.get_mut(&dst) else {
                continue;
            };
            let Some(outcome) = peer.arq.poll(Instant::now()) else {
                continue;
            };
            self.stats.record(|s| s.timeouts += 1);

            match outcome {
                TimeoutOutcome::Retransmit { retry, frames } => {
                    log::debug!(
                        "[node {}] timeout toward {dst}: retry {retry}, resending {} frame(s)",
                        self.address,
                        frames.len()
                    );
                    self.medium.retry_pause(retry, &mut self.shutdown).await?;
                    for tx in frames {
                        self.send_data(tx).await?;
                    }
                    self.rearm(dst);
                }
                TimeoutOutcome::GaveUp { failed } => {
                    log::warn!(
                        "[node {}] giving up toward {dst}: {} message(s) failed",
                        self.address,
                        failed.len()
                    );
                    for id in failed {
                        self.purge(dst, id);
                        self.report(id, dst, DeliveryOutcome::Failed).await?;
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_bytes(&mut self, bytes: &[u8]) -> Result<(), Halt> {
        self.decoder.push(bytes);
        while let Some(event) = self.decoder.next_event() {
            match event {
                DecodeEvent::Rejected(reason) => self.on_reject(reason),
                DecodeEvent::Frame(frame) => self.on_frame(frame).await?,
            }
        }
        Ok(())
    }

    fn on_reject(&self, reason: Reject) {
        if reason.is_noise() {
            log::debug!("[node {}] dropped frame: {reason}", self.address);
            self.stats.record(|s| s.crc_errors += 1);
        } else {
            log::warn!("[node {}] protocol violation: {reason}", self.address);
            self.stats.record(|s| s.protocol_violations += 1);
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<(), Halt> {
        if frame.src == self.address {
            return Ok(());
        }
        if frame.dst != self.address && !frame.is_broadcast() {
            self.stats.record(|s| s.foreign_frames += 1);
            return Ok(());
        }
        if frame.src == BROADCAST || (frame.kind == FrameType::Ack && frame.is_broadcast()) {
            log::warn!(
                "[node {}] protocol violation: {:?} {} → {}",
                self.address,
                frame.kind,
                frame.src,
                frame.dst
            );
            self.stats.record(|s| s.protocol_violations += 1);
            return Ok(());
        }

        match frame.kind {
            FrameType::Ack => self.on_ack(frame).await,
            FrameType::Data => self.on_data(frame).await,
        }
    }

    async fn on_ack(&mut self, frame: Frame) -> Result<(), Halt> {
        self.stats.record(|s| s.acks_received += 1);
        let Some(peer) = self.peers.get_mut(&frame.src) else {
            log::debug!("[node {}] ACK from unknown peer {}", self.address, frame.src);
            return Ok(());
        };

        let outcome = peer.arq.on_ack(frame.seq, Instant::now());
        if outcome.acked == 0 {
            log::trace!("[node {}] stale ACK {} from {}", self.address, frame.seq, frame.src);
        } else {
            log::debug!(
                "[node {}] ← ACK {} from {}, {} frame(s) acknowledged",
                self.address,
                frame.seq,
                frame.src,
                outcome.acked
            );
        }
        for id in outcome.completed {
            self.report(id, frame.src, DeliveryOutcome::Delivered).await?;
        }
        for id in outcome.unconfirmed {
            log::debug!(
                "[node {}] {id} to {} acknowledged ambiguously after a give-up",
                self.address,
                frame.src
            );
            self.report(id, frame.src, DeliveryOutcome::Failed).await?;
        }
        Ok(())
    }

    async fn on_data(&mut self, frame: Frame) -> Result<(), Halt> {
        self.stats.record(|s| s.packets_received += 1);
        let Frame {
            src,
            dst,
            seq,
            payload,
            ..
        } = frame;

        if dst == BROADCAST {
            if self.broadcast_rx.on_data(src, seq).accepted {
                return self.deliver(src, payload, true).await;
            }
            self.stats.record(|s| s.duplicates += 1);
            return Ok(());
        }

        let (ack_seq, accepted, message) = match &mut self.inbound {
            Inbound::StopAndWait(rx) => {
                let verdict = rx.on_data(src, seq);
                (
                    verdict.ack_seq,
                    verdict.accepted,
                    verdict.accepted.then_some(payload),
                )
            }
            Inbound::GoBackN(rx) => {
                let verdict = rx.on_data(src, seq, &payload);
                if verdict.overflowed {
                    log::warn!(
                        "[node {}] message from {src} exceeds {} bytes, dropping",
                        self.address,
                        self.config.max_message_len
                    );
                    self.stats.record(|s| s.protocol_violations += 1);
                }
                (verdict.ack_seq, verdict.accepted, verdict.message)
            }
        };
        if !accepted {
            log::trace!("[node {}] duplicate seq={seq} from {src}", self.address);
            self.stats.record(|s| s.duplicates += 1);
        }

        self.send_ack(src, ack_seq).await?;
        match message {
            Some(payload) => self.deliver(src, payload, false).await,
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Upward channels
    // -----------------------------------------------------------------------

    async fn deliver(&mut self, src: u8, payload: Vec<u8>, broadcast: bool) -> Result<(), Halt> {
        log::debug!(
            "[node {}] delivering {} bytes from {src}",
            self.address,
            payload.len()
        );
        let delivery = Delivery {
            src,
            payload,
            broadcast,
        };
        send_or_shutdown(&self.deliveries, delivery, &mut self.shutdown).await
    }

    async fn report(
        &mut self,
        id: MessageId,
        dst: u8,
        outcome: DeliveryOutcome,
    ) -> Result<(), Halt> {
        self.count_outcome(outcome);
        let feedback = Feedback { id, dst, outcome };
        send_or_shutdown(&self.feedback, feedback, &mut self.shutdown).await
    }

    fn count_outcome(&self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.stats.record(|s| s.messages_delivered += 1),
            DeliveryOutcome::Failed => self.stats.record(|s| s.messages_failed += 1),
            DeliveryOutcome::Unacknowledged => {}
        }
    }

    /// Report `Failed` for everything still held, without blocking.
    fn fail_pending(&mut self) {
        let mut failed: Vec<(MessageId, u8)> = Vec::new();
        for (&dst, peer) in self.peers.iter_mut() {
            for id in peer.arq.abort() {
                failed.push((id, dst));
            }
            for seg in peer.queue.drain(..) {
                if !failed.contains(&(seg.message, dst)) {
                    failed.push((seg.message, dst));
                }
            }
        }
        failed.extend(self.broadcast_queue.drain(..).map(|out| (out.id, out.dst)));
        self.app_rx.close();
        while let Ok(out) = self.app_rx.try_recv() {
            failed.push((out.id, out.dst));
        }

        for (id, dst) in failed {
            self.count_outcome(DeliveryOutcome::Failed);
            let feedback = Feedback {
                id,
                dst,
                outcome: DeliveryOutcome::Failed,
            };
            if self.feedback.try_send(feedback).is_err() {
                log::debug!("[node {}] could not report {id} as failed", self.address);
            }
        }
    }
}

/// Hand `value` upward unless shutdown is requested first.  A dropped
/// receiver is not an error; the application simply stopped listening.
async fn send_or_shutdown<T>(
    tx: &mpsc::Sender<T>,
    value: T,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), Halt> {
    tokio::select! {
        res = tx.send(value) => {
            if res.is_err() {
                log::trace!("upward channel closed, dropping");
            }
            Ok(())
        }
        _ = shutdown.changed() => Err(Halt::Shutdown),
    }
}
