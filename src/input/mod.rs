pub mod asc;
pub mod csv;

pub use asc::load_asc;
pub use csv::load_csv;

use crate::core::Frame;
use crate::error::ParseError;
use std::path::Path;

/// Input format detection result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputFormat {
    Asc,
    Csv,
    Unknown,
}

/// Detect the format of a log from its extension, falling back to its content
pub fn detect_format(path: &Path, data: &[u8]) -> InputFormat {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("asc") => return InputFormat::Asc,
        Some("csv") => return InputFormat::Csv,
        _ => {}
    }

    let text = String::from_utf8_lossy(&data[..data.len().min(1024)]);

    if is_asc(&text) {
        InputFormat::Asc
    } else if is_csv(&text) {
        InputFormat::Csv
    } else {
        InputFormat::Unknown
    }
}

fn is_asc(text: &str) -> bool {
    text.lines().take(10).any(|line| {
        let line = line.trim_start();
        line.starts_with("date ") || line.starts_with("base ") || line.starts_with("Begin Triggerblock")
    })
}

fn is_csv(text: &str) -> bool {
    // Multiple commas on one of the first lines
    text.lines().take(5).any(|line| line.chars().filter(|&c| c == ',').count() >= 2)
}

/// Load every frame of a log, auto-detecting its format
///
/// The whole file is parsed up front so a malformed record fails the read
/// before any frame is replayed.
pub fn load_file(path: &Path) -> Result<Vec<Frame>, ParseError> {
    let data = std::fs::read(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match detect_format(path, &data) {
        InputFormat::Asc => load_asc(path),
        InputFormat::Csv => load_csv(path),
        InputFormat::Unknown => Err(ParseError::UnknownFormat { path: path.to_path_buf() }),
    }
}
