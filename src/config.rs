//! Channel map and replay options.
//!
//! A channel map is a JSON array of descriptors, one per live channel:
//!
//! ```json
//! [
//!     { "channel_id": 0, "interface_name": "can0", "bit_rate": 500000 },
//!     { "chan": 1, "interface": "can1", "bitrate": 250000 }
//! ]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// File looked up when no map sits next to the log
pub const DEFAULT_CONFIG: &str = "default.json";

/// Default bound on each send/recv call
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Default transmit queue length applied during bring-up
pub const DEFAULT_TXQUEUELEN: u32 = 10;

/// Configuration for one live channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Logical channel matched against `Frame::channel`
    #[serde(alias = "chan")]
    pub channel_id: u8,
    /// Interface name (e.g. "can0", "/dev/ttyACM0", "mock0")
    #[serde(alias = "interface")]
    pub interface_name: String,
    /// Bitrate in bits per second
    #[serde(alias = "bitrate")]
    pub bit_rate: u32,
}

/// Ordered collection of channel descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMap {
    pub channels: Vec<ChannelConfig>,
}

impl ChannelMap {
    /// Parse and validate a channel map
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let channels: Vec<ChannelConfig> = serde_json::from_str(json)?;
        Ok(Self { channels })
    }

    /// Load a channel map from disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let map = Self::from_json(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        map.validate()?;
        Ok(map)
    }

    /// Reject descriptors no port could ever be opened for
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut seen = HashSet::new();
        for (index, ch) in self.channels.iter().enumerate() {
            if ch.interface_name.trim().is_empty() {
                return Err(ConfigError::InvalidChannel {
                    index,
                    reason: "interface name is empty".into(),
                });
            }
            if ch.bit_rate == 0 {
                return Err(ConfigError::InvalidChannel {
                    index,
                    reason: format!("{}: bit rate must be positive", ch.interface_name),
                });
            }
            if !seen.insert(ch.channel_id) {
                warn!(
                    channel = ch.channel_id,
                    interface = %ch.interface_name,
                    "duplicate channel id, frames will fan out to every match"
                );
            }
        }
        Ok(())
    }
}

/// Candidate channel map locations for a log, in lookup order
pub fn config_candidates(log_path: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![log_path.with_extension("json"), PathBuf::from(DEFAULT_CONFIG)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("can-replay").join(DEFAULT_CONFIG));
    }
    candidates
}

/// Pick the channel map for a log: the explicit path, or the first candidate that exists
pub fn resolve_config(explicit: Option<&Path>, log_path: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let searched = config_candidates(log_path);
    searched
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or(ConfigError::NotFound { searched })
}

/// Options for a replay session
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Run interface bring-up before opening each port
    pub bring_up: bool,
    /// Bound on every send/recv issued by a port
    pub io_timeout: Duration,
    /// Poll each enabled port for received frames after every dispatch
    pub rx_poll: Option<Duration>,
    /// Detailed status and per-frame logging
    pub verbose: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            bring_up: false,
            io_timeout: DEFAULT_IO_TIMEOUT,
            rx_poll: None,
            verbose: false,
        }
    }
}
