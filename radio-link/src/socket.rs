//! UDP stand-in for a radio.
//!
//! [`UdpPhy`] carries raw link-layer bytes in UDP datagrams so separate
//! processes can share a "channel".  Point `remote` at a broadcast address
//! (or at the single peer) to emulate the shared medium.  The socket adds no
//! framing of its own; all protocol logic lives above the [`PhyPort`].

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::node::PhyPort;

/// Largest datagram read in one call.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct UdpPhy {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpPhy {
    /// Bind `local` and send everything to `remote`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local: SocketAddr, remote: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local).await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, remote })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Change where transmissions go (useful after binding ephemeral ports).
    pub fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = remote;
    }

    /// Start pumping bytes between the socket and a [`PhyPort`].
    ///
    /// The task stops when the port's sender is dropped or the receive side
    /// is no longer read.
    pub fn spawn(self, capacity: usize) -> (PhyPort, JoinHandle<()>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.pump(out_rx, in_tx));
        (
            PhyPort {
                tx: out_tx,
                rx: in_rx,
            },
            task,
        )
    }

    async fn pump(self, mut out_rx: mpsc::Receiver<Vec<u8>>, in_tx: mpsc::Sender<Vec<u8>>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                maybe = out_rx.recv() => match maybe {
                    Some(bytes) => {
                        if let Err(e) = self.socket.send_to(&bytes, self.remote).await {
                            log::warn!("[udp] send to {} failed: {e}", self.remote);
                        }
                    }
                    None => break,
                },

                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((n, from)) => {
                        log::trace!("[udp] {n} bytes from {from}");
                        if in_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[udp] receive failed: {e}"),
                },
            }
        }
        log::debug!("[udp] pump stopped");
    }
}
