//! Link diagnostics counters.
//!
//! The engine owns a [`StatsRecorder`] and bumps counters as it works;
//! any number of [`StatsHandle`]s read consistent snapshots.  Counters only
//! grow and are never consulted by the protocol itself.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// DATA transmissions, first sends and retries.
    pub packets_sent: u64,
    /// DATA frames addressed to us (or broadcast) that passed the CRC.
    pub packets_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub retransmissions: u64,
    pub crc_errors: u64,
    pub protocol_violations: u64,
    pub timeouts: u64,
    pub duplicates: u64,
    /// Valid frames addressed to another node.
    pub foreign_frames: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub aloha_deferrals: u64,
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "packets sent:        {}", self.packets_sent)?;
        writeln!(f, "packets received:    {}", self.packets_received)?;
        writeln!(f, "acks sent:           {}", self.acks_sent)?;
        writeln!(f, "acks received:       {}", self.acks_received)?;
        writeln!(f, "retransmissions:     {}", self.retransmissions)?;
        writeln!(f, "crc errors:          {}", self.crc_errors)?;
        writeln!(f, "protocol violations: {}", self.protocol_violations)?;
        writeln!(f, "timeouts:            {}", self.timeouts)?;
        writeln!(f, "duplicates:          {}", self.duplicates)?;
        writeln!(f, "foreign frames:      {}", self.foreign_frames)?;
        writeln!(f, "messages delivered:  {}", self.messages_delivered)?;
        writeln!(f, "messages failed:     {}", self.messages_failed)?;
        write!(f, "aloha deferrals:     {}", self.aloha_deferrals)
    }
}

/// Write side, held by the node engine.
#[derive(Debug)]
pub struct StatsRecorder {
    tx: watch::Sender<LinkStats>,
}

/// Read side, cheap to clone.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    rx: watch::Receiver<LinkStats>,
}

impl StatsRecorder {
    pub fn new() -> (Self, StatsHandle) {
        let (tx, rx) = watch::channel(LinkStats::default());
        (Self { tx }, StatsHandle { rx })
    }

    pub fn record(&self, update: impl FnOnce(&mut LinkStats)) {
        self.tx.send_modify(update);
    }

    pub fn snapshot(&self) -> LinkStats {
        self.tx.borrow().clone()
    }
}

impl StatsHandle {
    pub fn snapshot(&self) -> LinkStats {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_sees_recorded_counts() {
        let (recorder, handle) = StatsRecorder::new();
        recorder.record(|s| s.crc_errors += 2);
        recorder.record(|s| s.acks_sent += 1);

        let snap = handle.snapshot();
        assert_eq!(snap.crc_errors, 2);
        assert_eq!(snap.acks_sent, 1);
        assert_eq!(snap, recorder.snapshot());
        assert!(snap.to_string().contains("crc errors:          2"));
    }
}
