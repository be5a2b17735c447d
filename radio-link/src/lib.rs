//! `radio-link`: a link layer for small packet-radio mesh nodes.
//!
//! # Architecture
//!
//! ```text
//!  Application   submit(dst, payload) / deliveries / feedback
//!       │
//!  ┌────▼───────────────────────────────────────────────┐
//!  │  node engine (one tokio task per node)             │
//!  │   ├── Arq per destination                          │
//!  │   │     ├── StopAndWaitSender   (1 outstanding)    │
//!  │   │     └── GbnSender           (window of N)      │
//!  │   ├── StopAndWaitReceiver / GbnReceiver            │
//!  │   └── Medium (p-persistent ALOHA)                  │
//!  └────┬───────────────────────────────────────────────┘
//!       │ frames: preamble │ sync │ header │ payload │ CRC-16
//!  ┌────▼──────────┐
//!  │   PhyPort     │  SharedChannel (simulated) or UdpPhy
//!  └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`crc`]: CRC-16/CCITT-FALSE and bit-string CRC-32
//! - [`frame`]: wire format, sync-word scanning, streaming decoder
//! - [`bitframe`]: legacy fixed-size bit frame profile
//! - [`seq`]: modulo-256 sequence arithmetic
//! - [`timer`]: retransmission timer and retry budget
//! - [`sender`]: stop-and-wait outbound state
//! - [`receiver`]: stop-and-wait duplicate suppression
//! - [`gbn_sender`]: Go-Back-N sliding window
//! - [`gbn_receiver`]: Go-Back-N in-order acceptance and reassembly
//! - [`arq`]: per-destination ARQ dispatch
//! - [`aloha`]: medium access and retry backoff
//! - [`message`]: application-facing message types
//! - [`config`]: node configuration and validation
//! - [`stats`]: link counters
//! - [`node`]: the engine task and its handle
//! - [`simulator`]: lossy shared channel for tests and demos
//! - [`socket`]: UDP physical layer

pub mod aloha;
pub mod arq;
pub mod bitframe;
pub mod config;
pub mod crc;
pub mod frame;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod message;
pub mod node;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod stats;
pub mod timer;

pub use config::{ArqConfig, ArqMode, NodeConfig};
pub use frame::{Frame, FrameCodec, FrameDecoder, FrameType, BROADCAST, MAX_PAYLOAD};
pub use message::{Delivery, DeliveryOutcome, Feedback, MessageId};
pub use node::{spawn, NodeError, NodeHandle, PhyPort};
pub use stats::LinkStats;
