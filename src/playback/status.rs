//! Status reporting.
//!
//! The scheduler hands a fresh snapshot to a `StatusSink` after every
//! dispatched frame and once more when the session stops. Sinks only observe.

use crate::playback::SessionState;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

/// Counters and health of one port at the moment of the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    pub channel_id: u8,
    pub interface: String,
    pub sent: u64,
    pub received: u64,
    pub enabled: bool,
}

/// Point-in-time view of a replay session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Wall time since the first frame was fetched
    pub elapsed: Duration,
    pub state: SessionState,
    /// Frames delivered to at least one port
    pub frames_dispatched: u64,
    /// Frames with no enabled port on their channel
    pub frames_unrouted: u64,
    pub ports: Vec<PortStatus>,
}

impl StatusSnapshot {
    pub fn enabled_ports(&self) -> usize {
        self.ports.iter().filter(|p| p.enabled).count()
    }

    pub fn port(&self, channel_id: u8) -> Option<&PortStatus> {
        self.ports.iter().find(|p| p.channel_id == channel_id)
    }
}

/// Receives status snapshots from the scheduler
pub trait StatusSink {
    /// A frame was dispatched
    fn update(&mut self, snapshot: &StatusSnapshot);

    /// The session stopped; `snapshot` is final
    fn finish(&mut self, snapshot: &StatusSnapshot) {
        self.update(snapshot);
    }
}

/// Keeps every snapshot
impl StatusSink for Vec<StatusSnapshot> {
    fn update(&mut self, snapshot: &StatusSnapshot) {
        self.push(snapshot.clone());
    }
}

/// Single status line, rewritten in place
pub struct ConsoleStatus<W: Write> {
    out: W,
    verbose: bool,
}

impl ConsoleStatus<std::io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(std::io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleStatus<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render one status line
    pub fn render(snapshot: &StatusSnapshot, verbose: bool) -> String {
        let mut line = format!("   {:.3}s", snapshot.elapsed.as_secs_f64());
        for p in &snapshot.ports {
            if p.enabled {
                line.push_str(&format!("  [{} s:{} r:{}]", p.interface, p.sent, p.received));
            } else {
                line.push_str(&format!("  [{} s:{} r:{} DISABLED]", p.interface, p.sent, p.received));
            }
        }
        if verbose {
            line.push_str(&format!(
                "  {} frames:{} unrouted:{}",
                snapshot.state, snapshot.frames_dispatched, snapshot.frames_unrouted
            ));
        }
        line
    }

    fn write_line(&mut self, snapshot: &StatusSnapshot, terminator: &str) {
        let line = Self::render(snapshot, self.verbose);
        // Trailing spaces blank out a longer previous line
        let result = write!(self.out, "{line}    {terminator}").and_then(|_| self.out.flush());
        if let Err(e) = result {
            debug!("status output failed: {}", e);
        }
    }
}

impl<W: Write> StatusSink for ConsoleStatus<W> {
    fn update(&mut self, snapshot: &StatusSnapshot) {
        self.write_line(snapshot, "\r");
    }

    fn finish(&mut self, snapshot: &StatusSnapshot) {
        self.write_line(snapshot, "\n");
    }
}
