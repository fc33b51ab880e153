use async_trait::async_trait;
use crate::core::Frame;
use crate::hardware::can_interface::{CanInterface, CanResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SLCAN standard serial baud rate
const SERIAL_BAUD: u32 = 1_000_000;

/// How long to wait for a command acknowledgement
const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// SLCAN/Lawicel protocol serial CAN interface
///
/// Supports common USB-CAN adapters that use the SLCAN protocol:
/// - CANtact
/// - CANable
/// - Lawicel CANUSB
pub struct SerialCanInterface {
    /// Interface name (serial port path)
    name: String,
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Channel stamped on received frames
    channel: u8,
    /// Frames parsed but not yet handed out
    rx_buffer: VecDeque<Frame>,
    /// Line buffer for accumulating partial SLCAN frames
    line_buffer: String,
}

impl SerialCanInterface {
    /// Open the serial port, set the bit rate and open the CAN channel
    pub async fn connect(port_name: &str, bit_rate: u32, channel: u8) -> CanResult<Self> {
        info!("Connecting to serial port: {} at bitrate: {}", port_name, bit_rate);

        let bitrate_cmd = build_bitrate_command(bit_rate)
            .ok_or_else(|| format!("SLCAN does not support bitrate {}", bit_rate))?;

        let mut port = tokio_serial::new(port_name, SERIAL_BAUD)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| format!("Failed to open serial port {}: {}", port_name, e))?;

        // Close any session left open by a previous run
        port.write_all(b"C\r").await?;
        port.flush().await?;
        let mut junk = [0u8; 256];
        let _ = tokio::time::timeout(Duration::from_millis(50), port.read(&mut junk)).await;

        send_command(&mut port, &bitrate_cmd).await?;
        send_command(&mut port, b"O\r").await?;

        info!("CAN channel opened on {}", port_name);
        Ok(Self {
            name: port_name.to_string(),
            port,
            channel,
            rx_buffer: VecDeque::new(),
            line_buffer: String::new(),
        })
    }
}

/// Move every complete SLCAN line from `line_buffer` into `rx_buffer`
fn drain_lines(line_buffer: &mut String, channel: u8, rx_buffer: &mut VecDeque<Frame>) {
    while let Some(end) = line_buffer.find(['\r', '\n']) {
        let line: String = line_buffer.drain(..=end).collect();
        // A rejected command leaves a BEL in front of the next line
        let line = line.trim().trim_start_matches('\x07');
        match line {
            "" => continue,
            // Transmit acknowledgements
            "z" | "Z" => continue,
            _ => {}
        }
        match parse_frame(line, channel) {
            Some(frame) => rx_buffer.push_back(frame),
            None => warn!("Failed to parse SLCAN frame: {:?}", line),
        }
    }
}

/// Build SLCAN command to set bitrate
fn build_bitrate_command(bitrate: u32) -> Option<Vec<u8>> {
    let code = match bitrate {
        10_000 => '0',
        20_000 => '1',
        50_000 => '2',
        100_000 => '3',
        125_000 => '4',
        250_000 => '5',
        500_000 => '6',
        800_000 => '7',
        1_000_000 => '8',
        _ => return None,
    };
    Some(format!("S{}\r", code).into_bytes())
}

/// Build an SLCAN command to transmit a CAN frame
fn build_tx_command(frame: &Frame) -> Vec<u8> {
    let data_hex: String = frame.data.iter().map(|b| format!("{:02X}", b)).collect();

    match (frame.is_extended(), frame.remote) {
        (true, false) => format!("T{:08X}{}{}\r", frame.id, frame.data.len(), data_hex),
        (false, false) => format!("t{:03X}{}{}\r", frame.id, frame.data.len(), data_hex),
        (true, true) => format!("R{:08X}{}\r", frame.id, frame.data.len()),
        (false, true) => format!("r{:03X}{}\r", frame.id, frame.data.len()),
    }
    .into_bytes()
}

/// Parse an SLCAN frame line into a frame
fn parse_frame(line: &str, channel: u8) -> Option<Frame> {
    // Line noise decodes to U+FFFD
    if !line.is_ascii() {
        return None;
    }
    let kind = line.chars().next()?;
    let body = line.get(1..)?;

    // Standard IDs are 3 hex chars, extended IDs 8
    let (id_len, extended, remote) = match kind {
        't' => (3, false, false),
        'T' => (8, true, false),
        'r' => (3, false, true),
        'R' => (8, true, true),
        _ => return None,
    };

    let id = u32::from_str_radix(body.get(..id_len)?, 16).ok()?;
    let dlc = body.get(id_len..id_len + 1)?.parse::<usize>().ok()?;

    let data = if remote {
        Vec::new()
    } else {
        let hex = body.get(id_len + 1..id_len + 1 + dlc * 2)?;
        hex.as_bytes()
            .chunks(2)
            .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok())
            .collect::<Option<Vec<_>>>()?
    };

    Some(Frame {
        timestamp: 0.0,
        channel,
        id,
        extended,
        remote,
        data,
    })
}

/// Send a command and wait for SLCAN acknowledgment (\r)
async fn send_command(port: &mut tokio_serial::SerialStream, cmd: &[u8]) -> CanResult<()> {
    debug!("Sending SLCAN command: {}", String::from_utf8_lossy(cmd).trim_end());

    port.write_all(cmd).await?;
    port.flush().await?;

    let ack = tokio::time::timeout(ACK_TIMEOUT, read_ack(port)).await;

    match ack {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            // Some adapters never acknowledge commands
            warn!(
                "SLCAN command timeout (no ACK after {:?}): {}",
                ACK_TIMEOUT,
                String::from_utf8_lossy(cmd).trim_end()
            );
            Ok(())
        }
    }
}

/// Read until the device acknowledges (\r) or rejects (BEL) the last command
async fn read_ack(port: &mut tokio_serial::SerialStream) -> std::io::Result<()> {
    let mut buf = [0u8; 128];
    loop {
        let n = port.read(&mut buf).await?;
        if buf[..n].contains(&b'\x07') {
            return Err(std::io::Error::other("device rejected command"));
        }
        if buf[..n].contains(&b'\r') {
            return Ok(());
        }
    }
}

#[async_trait]
impl CanInterface for SerialCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, frame: &Frame) -> CanResult<()> {
        let cmd = build_tx_command(frame);
        self.port.write_all(&cmd).await?;
        self.port.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> CanResult<Option<Frame>> {
        if let Some(frame) = self.rx_buffer.pop_front() {
            return Ok(Some(frame));
        }

        let mut buf = [0u8; 256];
        match tokio::time::timeout(timeout, self.port.read(&mut buf)).await {
            Ok(Ok(n)) => {
                self.line_buffer.push_str(&String::from_utf8_lossy(&buf[..n]));
                drain_lines(&mut self.line_buffer, self.channel, &mut self.rx_buffer);
            }
            Ok(Err(e)) => return Err(format!("Read error: {}", e).into()),
            // Nothing arrived in time
            Err(_) => {}
        }

        Ok(self.rx_buffer.pop_front())
    }

    async fn close(&mut self) -> CanResult<()> {
        info!("Disconnecting from {}", self.name);
        self.port.write_all(b"C\r").await?;
        self.port.flush().await?;
        Ok(())
    }
}
