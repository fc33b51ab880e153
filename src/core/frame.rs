use serde::{Deserialize, Serialize};

/// Largest identifier that fits an 11-bit standard frame
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Largest identifier that fits a 29-bit extended frame
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Largest classic CAN payload
pub const MAX_DATA_LEN: usize = 8;

/// A recorded CAN frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds on the recording's own clock
    pub timestamp: f64,

    /// Logical channel the frame was captured on (0, 1, 2, etc.)
    pub channel: u8,

    /// CAN message ID (11-bit or 29-bit)
    pub id: u32,

    /// Whether the ID was recorded in the 29-bit format
    pub extended: bool,

    /// Remote transmission request
    #[serde(default)]
    pub remote: bool,

    /// Raw data bytes (0-8 bytes)
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a data frame, picking the ID format from the ID's magnitude
    pub fn new(timestamp: f64, channel: u8, id: u32, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            channel,
            id,
            extended: id > MAX_STANDARD_ID,
            remote: false,
            data,
        }
    }

    /// Check if this is an extended (29-bit) CAN ID
    pub fn is_extended(&self) -> bool {
        self.extended || self.id > MAX_STANDARD_ID
    }

    /// Get data as hex string
    pub fn hex_data(&self) -> String {
        self.data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse hex string to data bytes
    pub fn parse_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
        let hex = hex.replace(' ', "");
        let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(&hex);

        if !hex.is_ascii() {
            anyhow::bail!("Hex string contains non-ASCII characters");
        }
        if hex.len() % 2 != 0 {
            anyhow::bail!("Hex string must have even length");
        }

        hex.as_bytes()
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .map_err(anyhow::Error::from)
                    .and_then(|s| u8::from_str_radix(s, 16).map_err(anyhow::Error::from))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| anyhow::anyhow!("Failed to parse hex: {}", e))
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = if self.is_extended() {
            format!("{:08X}", self.id)
        } else {
            format!("{:03X}", self.id)
        };
        if self.remote {
            write!(f, "{:.6} ch{} {} R", self.timestamp, self.channel, id)
        } else {
            write!(
                f,
                "{:.6} ch{} {} [{}] {}",
                self.timestamp,
                self.channel,
                id,
                self.data.len(),
                self.hex_data()
            )
        }
    }
}
