//! Error types for replay sessions.
//!
//! Fatal errors (`ConfigError`, `ParseError`) are raised before any timing
//! sensitive work starts. `TransportError` is always contained to the port
//! that produced it: the port logs it and disables itself.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by transports
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Malformed or missing channel map
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read channel map {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid channel map {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no channel map found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("channel map declares no channels")]
    Empty,

    #[error("channel descriptor #{index} is invalid: {reason}")]
    InvalidChannel { index: usize, reason: String },
}

/// Malformed log record, raised before replay begins
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read log {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognised log format: {path}")]
    UnknownFormat { path: PathBuf },

    #[error("line {line}: {reason}")]
    Record { line: usize, reason: String },

    #[error("line {line}: timestamp {timestamp} goes backwards (previous {previous})")]
    Backwards { line: usize, timestamp: f64, previous: f64 },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

impl ParseError {
    pub fn record(line: usize, reason: impl Into<String>) -> Self {
        Self::Record { line, reason: reason.into() }
    }
}

/// Per-port transport failure
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{interface}: failed to open: {source}")]
    Open {
        interface: String,
        #[source]
        source: BoxError,
    },

    #[error("{interface}: bring-up failed: {source}")]
    BringUp {
        interface: String,
        #[source]
        source: BringUpError,
    },

    #[error("{interface}: {operation} failed: {source}")]
    Io {
        interface: String,
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{interface}: {operation} timed out after {after:?}")]
    Timeout {
        interface: String,
        operation: &'static str,
        after: Duration,
    },
}

/// OS-level interface configuration failure
#[derive(Error, Debug)]
pub enum BringUpError {
    #[error("could not run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Command { command: String, status: std::process::ExitStatus },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
