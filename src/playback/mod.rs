pub mod engine;
pub mod port;
pub mod status;

pub use engine::ReplayScheduler;
pub use status::ConsoleStatus;

use serde::Serialize;

/// Lifecycle of a replay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Ports open, no frame fetched yet
    Starting,
    /// First frame fetched, epoch recorded
    Armed,
    /// Pacing and dispatching frames
    Running,
    /// Terminal
    Stopped,
}

/// Why a session reached `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Every frame was pulled from the source
    Exhausted,
    /// No port was left enabled at a liveness re-check
    AllPortsDisabled,
    /// Cancelled from outside (Ctrl-C)
    Interrupted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Armed => "armed",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Exhausted => "end of log",
            StopReason::AllPortsDisabled => "all CAN interfaces are disabled",
            StopReason::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}
