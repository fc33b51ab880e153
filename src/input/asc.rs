//! Vector ASCII (`.asc`) log reader.
//!
//! Only classic CAN data and remote frames are replayed. Other events
//! (error frames, statistics, CAN FD records, J1939 transport) are skipped.

use crate::core::{Frame, MAX_DATA_LEN, MAX_EXTENDED_ID, MAX_STANDARD_ID};
use crate::error::ParseError;
use std::path::Path;
use tracing::{debug, info};

/// Load every frame of an ASC log, failing on the first malformed record
pub fn load_asc(path: &Path) -> Result<Vec<Frame>, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let frames = parse_asc(&content)?;
    info!("Loaded {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

/// Parse ASC log content
pub fn parse_asc(content: &str) -> Result<Vec<Frame>, ParseError> {
    let mut reader = AscReader::default();
    let mut frames = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        if let Some(frame) = reader.parse_line(idx + 1, line)? {
            frames.push(frame);
        }
    }

    if reader.skipped > 0 {
        debug!("Skipped {} non-frame ASC events", reader.skipped);
    }
    Ok(frames)
}

struct AscReader {
    radix: u32,
    relative: bool,
    /// Time of the last timestamped line, frame or event
    clock: Option<f64>,
    last_timestamp: Option<f64>,
    skipped: usize,
}

impl Default for AscReader {
    fn default() -> Self {
        Self {
            radix: 16,
            relative: false,
            clock: None,
            last_timestamp: None,
            skipped: 0,
        }
    }
}

impl AscReader {
    fn parse_line(&mut self, line_no: usize, line: &str) -> Result<Option<Frame>, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = tokens.first() else {
            return Ok(None);
        };

        let Ok(raw_ts) = first.parse::<f64>() else {
            self.parse_header(&tokens);
            return Ok(None);
        };

        if !raw_ts.is_finite() {
            return Err(ParseError::record(line_no, format!("invalid timestamp {first}")));
        }

        // Relative deltas count from the previous event, skipped or not
        let timestamp = match (self.relative, self.clock) {
            (true, Some(clock)) => clock + raw_ts,
            _ => raw_ts,
        };
        self.clock = Some(timestamp);

        // `<ts> <ch> <id> <Rx|Tx> ...` is a frame record; anything else is an event
        let is_frame = tokens.len() >= 4
            && tokens[1].parse::<u32>().is_ok()
            && (tokens[3].eq_ignore_ascii_case("rx") || tokens[3].eq_ignore_ascii_case("tx"));
        if !is_frame {
            self.skipped += 1;
            return Ok(None);
        }

        if let Some(previous) = self.last_timestamp {
            if timestamp < previous {
                return Err(ParseError::Backwards { line: line_no, timestamp, previous });
            }
        }

        let frame = self.parse_frame(line_no, timestamp, &tokens)?;
        self.last_timestamp = Some(timestamp);
        Ok(Some(frame))
    }

    fn parse_header(&mut self, tokens: &[&str]) {
        if !tokens[0].eq_ignore_ascii_case("base") {
            return;
        }
        // base hex  timestamps absolute
        match tokens.get(1).copied() {
            Some("dec") => self.radix = 10,
            Some("hex") => self.radix = 16,
            _ => {}
        }
        if let (Some(&"timestamps"), Some(&mode)) = (tokens.get(2), tokens.get(3)) {
            self.relative = mode == "relative";
        }
    }

    fn parse_frame(&self, line_no: usize, timestamp: f64, tokens: &[&str]) -> Result<Frame, ParseError> {
        let channel: u8 = tokens[1]
            .parse::<u8>()
            .ok()
            .and_then(|ch| ch.checked_sub(1))
            .ok_or_else(|| ParseError::record(line_no, format!("invalid channel {}", tokens[1])))?;

        let (id_str, extended) = match tokens[2].strip_suffix(['x', 'X']) {
            Some(stripped) => (stripped, true),
            None => (tokens[2], false),
        };
        let id = u32::from_str_radix(id_str, self.radix)
            .ok()
            .filter(|&id| id <= if extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID })
            .ok_or_else(|| ParseError::record(line_no, format!("invalid CAN id {}", tokens[2])))?;

        let kind = tokens
            .get(4)
            .ok_or_else(|| ParseError::record(line_no, "missing frame type"))?;

        let (remote, data) = match *kind {
            "d" | "D" => {
                let dlc = tokens
                    .get(5)
                    .and_then(|t| usize::from_str_radix(t, 16).ok())
                    .filter(|&dlc| dlc <= MAX_DATA_LEN)
                    .ok_or_else(|| ParseError::record(line_no, "invalid DLC"))?;
                let bytes = tokens
                    .get(6..6 + dlc)
                    .ok_or_else(|| ParseError::record(line_no, format!("expected {dlc} data bytes")))?;
                let data = bytes
                    .iter()
                    .map(|b| u8::from_str_radix(b, self.radix))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ParseError::record(line_no, format!("invalid data byte: {e}")))?;
                (false, data)
            }
            "r" | "R" => (true, Vec::new()),
            other => {
                return Err(ParseError::record(line_no, format!("unknown frame type {other}")));
            }
        };

        Ok(Frame {
            timestamp,
            channel,
            id,
            extended,
            remote,
            data,
        })
    }
}
