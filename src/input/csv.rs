use crate::core::{Frame, MAX_DATA_LEN, MAX_EXTENDED_ID};
use crate::error::ParseError;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Load CAN frames from a CSV file
///
/// Supports flexible column formats:
/// - time,bus,msg_id,data
/// - timestamp,channel,can_id,payload
///
/// Timestamps are either seconds on the log's clock or RFC 3339 instants,
/// which are converted to seconds relative to the first row.
pub fn load_csv(path: &Path) -> Result<Vec<Frame>, ParseError> {
    let file = std::fs::File::open(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let frames = parse_csv(file)?;
    info!("Loaded {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

/// Parse CSV content from any reader
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<Frame>, ParseError> {
    let mut rdr = csv::Reader::from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = detect_columns(&headers)?;

    let mut frames: Vec<Frame> = Vec::new();
    let mut base_time: Option<DateTime<Utc>> = None;

    for (idx, result) in rdr.records().enumerate() {
        // Header is line 1
        let line = idx + 2;
        let record = result?;

        let field = |col: usize, name: &str| {
            record
                .get(col)
                .map(str::trim)
                .ok_or_else(|| ParseError::record(line, format!("missing {name} column")))
        };

        let timestamp = parse_time(field(columns.time, "time")?, &mut base_time)
            .ok_or_else(|| ParseError::record(line, "invalid timestamp"))?;
        if let Some(previous) = frames.last().map(|f| f.timestamp) {
            if timestamp < previous {
                return Err(ParseError::Backwards { line, timestamp, previous });
            }
        }

        let bus_str = field(columns.bus, "bus")?;
        let channel = bus_str
            .parse::<u8>()
            .map_err(|_| ParseError::record(line, format!("invalid bus {bus_str}")))?;

        // Could be decimal or hex like "0x123"
        let id_str = field(columns.id, "id")?;
        let id = match id_str.strip_prefix("0x").or_else(|| id_str.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => id_str.parse::<u32>().ok(),
        }
        .filter(|&id| id <= MAX_EXTENDED_ID)
        .ok_or_else(|| ParseError::record(line, format!("invalid CAN id {id_str}")))?;

        let data = Frame::parse_hex(field(columns.data, "data")?)
            .map_err(|e| ParseError::record(line, e.to_string()))?;
        if data.len() > MAX_DATA_LEN {
            return Err(ParseError::record(line, format!("{} data bytes exceeds {MAX_DATA_LEN}", data.len())));
        }

        frames.push(Frame::new(timestamp, channel, id, data));
    }

    Ok(frames)
}

fn parse_time(value: &str, base_time: &mut Option<DateTime<Utc>>) -> Option<f64> {
    if let Ok(secs) = value.parse::<f64>() {
        return secs.is_finite().then_some(secs);
    }

    let instant = DateTime::parse_from_rfc3339(value).ok()?.with_timezone(&Utc);
    let base = *base_time.get_or_insert(instant);
    let micros = (instant - base).num_microseconds()?;
    Some(micros as f64 / 1_000_000.0)
}

struct Columns {
    time: usize,
    bus: usize,
    id: usize,
    data: usize,
}

/// Detect column indices from CSV headers
fn detect_columns(headers: &csv::StringRecord) -> Result<Columns, ParseError> {
    Ok(Columns {
        time: find_column(headers, &["time", "timestamp", "t", "ts"])?,
        bus: find_column(headers, &["bus", "channel", "chan", "interface"])?,
        id: find_column(headers, &["id", "addr", "msg_id", "can_id", "message_id"])?,
        data: find_column(headers, &["data", "payload", "hex", "bytes"])?,
    })
}

/// Find a column by checking possible names
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize, ParseError> {
    headers
        .iter()
        .position(|header| {
            let header = header.trim().to_lowercase();
            names.iter().any(|&name| header == name)
        })
        .ok_or_else(|| ParseError::record(1, format!("could not find column with names: {:?}", names)))
}
