use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::ReplayOptions;

#[derive(Debug, Parser, Clone)]
#[command(name = "can-replay")]
#[command(about = "Replay a recorded CAN log onto live interfaces in real time")]
pub struct Cli {
    /// Log to replay (Vector ASC or CSV).
    #[arg(long, visible_alias = "asc")]
    pub log: PathBuf,

    /// Channel map; defaults to <log>.json, then default.json.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bring interfaces down, set bitrate and queue length, bring them up.
    #[arg(long)]
    pub init: bool,

    /// Run bring-up commands through sudo.
    #[arg(long, requires = "init")]
    pub sudo: bool,

    /// Detailed status line and debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Bound on each transport send/recv, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub io_timeout_ms: u64,

    /// Poll every port for received frames after each dispatch, waiting this long.
    #[arg(long)]
    pub rx_poll_ms: Option<u64>,
}

impl Cli {
    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            bring_up: self.init,
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            rx_poll: self.rx_poll_ms.map(Duration::from_millis),
            verbose: self.verbose,
        }
    }
}
