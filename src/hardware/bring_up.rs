//! OS-level interface bring-up.
//!
//! Bring-up is an injected side effect run once per port before its
//! transport is opened. Only SocketCAN interfaces need it; serial and
//! virtual interfaces are left alone.

use async_trait::async_trait;
use crate::config::{ChannelConfig, DEFAULT_TXQUEUELEN};
use crate::error::BringUpError;
use crate::hardware::can_interface::InterfaceType;
use tokio::process::Command;
use tracing::{debug, info};

/// Prepares a network interface for CAN traffic
#[async_trait]
pub trait BringUp: Send + Sync {
    async fn bring_up(&self, config: &ChannelConfig) -> Result<(), BringUpError>;
}

/// Configures SocketCAN interfaces with `ip link`: down, bitrate, txqueuelen, up
#[derive(Debug, Clone)]
pub struct IpLinkBringUp {
    /// Prefix every command with `sudo`
    pub use_sudo: bool,
    pub txqueuelen: u32,
}

impl Default for IpLinkBringUp {
    fn default() -> Self {
        Self {
            use_sudo: false,
            txqueuelen: DEFAULT_TXQUEUELEN,
        }
    }
}

impl IpLinkBringUp {
    /// The `ip` argument lists run for one interface, in order
    pub fn commands(&self, config: &ChannelConfig) -> Vec<Vec<String>> {
        let iface = config.interface_name.as_str();
        let bitrate = config.bit_rate.to_string();
        let txqueuelen = self.txqueuelen.to_string();
        let steps: [&[&str]; 4] = [
            &["link", "set", iface, "down"],
            &["link", "set", iface, "type", "can", "bitrate", bitrate.as_str()],
            &["link", "set", iface, "txqueuelen", txqueuelen.as_str()],
            &["link", "set", iface, "up"],
        ];

        steps
            .iter()
            .map(|args| {
                let mut cmd = Vec::with_capacity(args.len() + 2);
                if self.use_sudo {
                    cmd.push("sudo".to_string());
                }
                cmd.push("ip".to_string());
                cmd.extend(args.iter().map(|a| a.to_string()));
                cmd
            })
            .collect()
    }

    async fn run(argv: &[String]) -> Result<(), BringUpError> {
        let command = argv.join(" ");
        debug!("Running `{}`", command);

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .await
            .map_err(|source| BringUpError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(BringUpError::Command { command, status })
        }
    }
}

#[async_trait]
impl BringUp for IpLinkBringUp {
    async fn bring_up(&self, config: &ChannelConfig) -> Result<(), BringUpError> {
        if InterfaceType::detect(&config.interface_name) != InterfaceType::SocketCan {
            debug!("{}: no bring-up needed", config.interface_name);
            return Ok(());
        }

        for argv in self.commands(config) {
            Self::run(&argv).await?;
        }

        info!("{}: configured at {} bit/s", config.interface_name, config.bit_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ChannelConfig {
        ChannelConfig {
            channel_id: 0,
            interface_name: name.to_string(),
            bit_rate: 250_000,
        }
    }

    #[test]
    fn test_command_sequence() {
        let bring_up = IpLinkBringUp::default();
        let cmds = bring_up.commands(&config("can1"));

        assert_eq!(cmds.len(), 4);
        assert_eq!(cmds[0].join(" "), "ip link set can1 down");
        assert_eq!(cmds[1].join(" "), "ip link set can1 type can bitrate 250000");
        assert_eq!(cmds[2].join(" "), "ip link set can1 txqueuelen 10");
        assert_eq!(cmds[3].join(" "), "ip link set can1 up");
    }

    #[test]
    fn test_sudo_prefix() {
        let bring_up = IpLinkBringUp { use_sudo: true, ..Default::default() };
        assert!(bring_up.commands(&config("can0")).iter().all(|c| c[0] == "sudo" && c[1] == "ip"));
    }

    #[tokio::test]
    async fn test_non_socketcan_interfaces_skip_bring_up() {
        let bring_up = IpLinkBringUp::default();
        assert!(bring_up.bring_up(&config("mock0")).await.is_ok());
        assert!(bring_up.bring_up(&config("/dev/ttyACM0")).await.is_ok());
    }
}
