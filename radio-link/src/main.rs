//! Entry point for `radio-link`.
//!
//! Parses CLI arguments and dispatches into one of three modes:
//!
//! - `node`: a single node on a UDP "radio", reading `dst:body` lines from
//!   stdin and printing deliveries and feedback to stdout;
//! - `demo`: several nodes on a simulated lossy channel, printing stats;
//! - `legacy-encode`: hex dump of a message in the legacy bit-frame profile.
//!
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use radio_link::aloha::{AlohaPolicy, RetryBackoff};
use radio_link::bitframe::packetize;
use radio_link::config::{ArqConfig, ArqMode, NodeConfig};
use radio_link::message::{parse_addressed, DeliveryOutcome};
use radio_link::simulator::{SharedChannel, SimulatorConfig};
use radio_link::socket::UdpPhy;
use radio_link::{LinkStats, NodeHandle};

/// Link layer for packet-radio mesh nodes.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one node over UDP; type `dst:body` lines to send.
    Node {
        /// This node's link address (0-254).
        #[arg(short, long)]
        address: u8,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Where transmissions go; a broadcast address emulates a shared channel.
        #[arg(short, long, default_value = "255.255.255.255:9000")]
        remote: SocketAddr,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Run several nodes on a simulated lossy channel.
    Demo {
        #[arg(long, default_value_t = 3)]
        nodes: u8,
        /// Messages each node sends to its neighbour.
        #[arg(long, default_value_t = 5)]
        messages: usize,
        #[arg(long, default_value_t = 0.1)]
        loss: f64,
        #[arg(long, default_value_t = 0.05)]
        corrupt: f64,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Print the legacy bit frames for a message, one hex line per frame.
    LegacyEncode {
        /// 2-bit destination address.
        #[arg(short, long, default_value_t = 0)]
        address: u8,
        #[arg(long, default_value_t = 0)]
        seq: u8,
        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    StopAndWait,
    GoBackN,
}

#[derive(Args)]
struct LinkArgs {
    #[arg(long, value_enum, default_value = "stop-and-wait")]
    mode: ModeArg,
    /// Go-Back-N window size.
    #[arg(long, default_value_t = 4)]
    window: usize,
    /// ALOHA transmit probability.
    #[arg(short, long, default_value_t = 0.3)]
    p: f64,
    #[arg(long, default_value_t = 100)]
    backoff_min_ms: u64,
    #[arg(long, default_value_t = 500)]
    backoff_max_ms: u64,
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    /// Enable binary exponential backoff before retransmissions.
    #[arg(long)]
    retry_slot_ms: Option<u64>,
    #[arg(long, default_value_t = 255)]
    segment_size: usize,
    /// Preamble length in bytes.
    #[arg(long, default_value_t = 4)]
    preamble: usize,
    /// Random bytes sent ahead of each new message.
    #[arg(long, default_value_t = 0)]
    training_burst: usize,
}

impl LinkArgs {
    fn config(&self, address: u8) -> NodeConfig {
        let mode = match self.mode {
            ModeArg::StopAndWait => ArqMode::StopAndWait,
            ModeArg::GoBackN => ArqMode::GoBackN {
                window_size: self.window,
            },
        };
        let retry_backoff = match self.retry_slot_ms {
            Some(ms) => RetryBackoff::BinaryExponential {
                slot: Duration::from_millis(ms),
                max_exponent: 6,
            },
            None => RetryBackoff::None,
        };
        NodeConfig {
            arq: ArqConfig {
                mode,
                timeout: Duration::from_millis(self.timeout_ms),
                max_retries: self.max_retries,
                retry_backoff,
            },
            aloha: AlohaPolicy {
                probability: self.p,
                backoff_min: Duration::from_millis(self.backoff_min_ms),
                backoff_max: Duration::from_millis(self.backoff_max_ms),
            },
            preamble_len: self.preamble,
            segment_size: self.segment_size,
            training_burst_len: self.training_burst,
            ..NodeConfig::new(address)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Node {
            address,
            bind,
            remote,
            link,
        } => run_node(link.config(address), bind, remote).await,
        Command::Demo {
            nodes,
            messages,
            loss,
            corrupt,
            seed,
            link,
        } => {
            let sim = SimulatorConfig {
                loss_rate: loss,
                corrupt_rate: corrupt,
                fragment_rate: 0.2,
                garbage_rate: 0.1,
                seed,
                ..SimulatorConfig::default()
            };
            run_demo(&link, sim, nodes, messages).await
        }
        Command::LegacyEncode {
            address,
            seq,
            message,
        } => {
            for frame in packetize(message.as_bytes(), address, seq)? {
                let hex: String = frame.encode().iter().map(|b| format!("{b:02x}")).collect();
                println!("{:2} {hex}", frame.seq);
            }
            Ok(())
        }
    }
}

async fn run_node(config: NodeConfig, bind: SocketAddr, remote: SocketAddr) -> Result<()> {
    let phy = UdpPhy::bind(bind, remote)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let (port, _pump) = phy.spawn(config.channel_capacity);
    let mut node = radio_link::spawn(config, port)?;
    log::info!("node {} listening on {bind}, sending to {remote}", node.address());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match parse_addressed(&line) {
                    Ok((dst, body)) => {
                        if let Err(e) = node.submit(dst, body).await {
                            eprintln!("error: {e}");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                },
                None => stdin_open = false,
            },

            Some(delivery) = node.deliveries.recv() => println!("{delivery}"),

            Some(feedback) = node.feedback.recv() => println!("{feedback}"),
        }
    }

    let stats = node.shutdown().await;
    while let Ok(feedback) = node.feedback.try_recv() {
        println!("{feedback}");
    }
    log::info!("final link statistics\n{stats}");
    Ok(())
}

async fn run_demo(
    link: &LinkArgs,
    sim: SimulatorConfig,
    nodes: u8,
    messages: usize,
) -> Result<()> {
    if nodes < 2 {
        bail!("the demo needs at least two nodes");
    }
    if nodes == radio_link::BROADCAST {
        bail!("at most 254 nodes");
    }

    let seed = sim.seed;
    let mut channel = SharedChannel::new(sim);
    let mut handles = Vec::new();
    for address in 1..=nodes {
        let mut config = link.config(address);
        config.rng_seed = Some(seed.wrapping_add(u64::from(address)));
        handles.push(radio_link::spawn(config, channel.attach())?);
    }
    let channel_task = channel.spawn();

    for (i, node) in handles.iter().enumerate() {
        let dst = (i + 1) % usize::from(nodes) + 1;
        for k in 0..messages {
            let body = format!("message {k} from node {}", node.address());
            node.submit(dst as u8, body).await?;
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, mut done_rx) = mpsc::channel(handles.len());
    let tasks: Vec<_> = handles
        .into_iter()
        .map(|node| tokio::spawn(drive(node, messages, done_tx.clone(), stop_rx.clone())))
        .collect();
    drop(done_tx);

    let (mut delivered, mut failed) = (0, 0);
    while let Some((ok, bad)) = done_rx.recv().await {
        delivered += ok;
        failed += bad;
    }
    let _ = stop_tx.send(true);

    for task in tasks {
        let (address, stats) = task.await?;
        println!("--- node {address} ---\n{stats}");
    }
    // Every node has dropped its transmitter, so the channel winds down.
    channel_task.await?;
    println!("{delivered} delivered, {failed} failed");
    Ok(())
}

/// Print deliveries until stopped; report feedback totals once every
/// submitted message has an outcome.
async fn drive(
    mut node: NodeHandle,
    expected: usize,
    done: mpsc::Sender<(usize, usize)>,
    mut stop: watch::Receiver<bool>,
) -> (u8, LinkStats) {
    let (mut ok, mut bad, mut pending) = (0, 0, expected);
    // Dropped once reported so the collector sees the channel close.
    let mut done = Some(done);
    if pending == 0 {
        report(&mut done, (0, 0)).await;
    }
    loop {
        tokio::select! {
            _ = stop.changed() => break,

            Some(delivery) = node.deliveries.recv() => {
                println!("node {}: {delivery}", node.address());
            }

            Some(feedback) = node.feedback.recv(), if pending > 0 => {
                match feedback.outcome {
                    DeliveryOutcome::Delivered => ok += 1,
                    _ => bad += 1,
                }
                pending -= 1;
                if pending == 0 {
                    report(&mut done, (ok, bad)).await;
                }
            }
        }
    }
    (node.address(), node.shutdown().await)
}

async fn report(done: &mut Option<mpsc::Sender<(usize, usize)>>, totals: (usize, usize)) {
    if let Some(tx) = done.take() {
        let _ = tx.send(totals).await;
    }
}
