use async_trait::async_trait;
use crate::config::ChannelConfig;
use crate::core::Frame;
use std::time::Duration;

pub use crate::error::BoxError;

/// Result type for CAN interface operations
pub type CanResult<T> = Result<T, BoxError>;

/// Trait for CAN bus interface implementations
///
/// This trait provides a common interface for different CAN hardware:
/// - USB-CAN serial adapters (SLCAN/Lawicel protocol)
/// - SocketCAN (Linux)
/// - Mock interfaces for testing
///
/// A connected interface is an exclusively owned transport handle. Dropping
/// it releases the underlying device.
#[async_trait]
pub trait CanInterface: Send {
    /// Get the name/identifier of this interface
    fn name(&self) -> &str;

    /// Send a CAN frame
    async fn send(&mut self, frame: &Frame) -> CanResult<()>;

    /// Wait up to `timeout` for a frame, returning None if nothing arrived
    async fn receive(&mut self, timeout: Duration) -> CanResult<Option<Frame>>;

    /// Release the interface
    async fn close(&mut self) -> CanResult<()> {
        Ok(())
    }
}

/// Opens transports for configured channels
#[async_trait]
pub trait Connector: Send + Sync {
    /// Acquire a transport handle for `config.interface_name` at `config.bit_rate`
    async fn open(&self, config: &ChannelConfig) -> CanResult<Box<dyn CanInterface>>;
}

/// Type of CAN interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterfaceType {
    /// USB-CAN serial adapter
    Serial,
    /// SocketCAN (Linux)
    SocketCan,
    /// Virtual/mock interface
    Virtual,
}

impl InterfaceType {
    /// Infer the interface type from its name
    pub fn detect(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        let is_com_port = upper
            .strip_prefix("COM")
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));

        if name.starts_with("/dev/") || is_com_port {
            InterfaceType::Serial
        } else if name.starts_with("mock") {
            InterfaceType::Virtual
        } else {
            InterfaceType::SocketCan
        }
    }
}
