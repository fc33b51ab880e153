use async_trait::async_trait;
use crate::config::ChannelConfig;
use crate::hardware::can_interface::{CanInterface, CanResult, Connector, InterfaceType};
use crate::hardware::mock::MockConnector;
use crate::hardware::serial_can::SerialCanInterface;
use std::time::Duration;

/// Opens the real transport matching each interface name
pub struct SystemConnector {
    #[cfg_attr(not(all(target_os = "linux", feature = "socketcan")), allow(dead_code))]
    io_timeout: Duration,
    virtual_bus: MockConnector,
}

impl SystemConnector {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            io_timeout,
            virtual_bus: MockConnector::new(),
        }
    }
}

#[async_trait]
impl Connector for SystemConnector {
    async fn open(&self, config: &ChannelConfig) -> CanResult<Box<dyn CanInterface>> {
        match InterfaceType::detect(&config.interface_name) {
            InterfaceType::Serial => {
                let iface =
                    SerialCanInterface::connect(&config.interface_name, config.bit_rate, config.channel_id)
                        .await?;
                Ok(Box::new(iface))
            }
            InterfaceType::Virtual => self.virtual_bus.open(config).await,
            InterfaceType::SocketCan => self.open_socketcan(config),
        }
    }
}

impl SystemConnector {
    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    fn open_socketcan(&self, config: &ChannelConfig) -> CanResult<Box<dyn CanInterface>> {
        use crate::hardware::socket_can::SocketCanInterface;

        let iface = SocketCanInterface::open(&config.interface_name, config.channel_id, self.io_timeout)?;
        Ok(Box::new(iface))
    }

    #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
    fn open_socketcan(&self, config: &ChannelConfig) -> CanResult<Box<dyn CanInterface>> {
        Err(format!(
            "{}: SocketCAN support not compiled in (build with --features socketcan on Linux)",
            config.interface_name
        )
        .into())
    }
}
