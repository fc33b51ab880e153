//! One configured channel: its transport handle, counters and health.

use crate::config::ChannelConfig;
use crate::core::Frame;
use crate::error::TransportError;
use crate::hardware::{BringUp, CanInterface, Connector};
use crate::playback::status::PortStatus;
use std::time::Duration;
use tracing::{debug, warn};

/// Send/receive counters; only ever increase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub sent: u64,
    pub received: u64,
}

enum PortState {
    Enabled {
        transport: Box<dyn CanInterface>,
        stats: PortStats,
    },
    Disabled {
        stats: PortStats,
    },
}

/// A live channel the scheduler dispatches frames to
///
/// A port starts enabled only if its transport opened. Any transport failure
/// after that disables it for the rest of the session; there is no way back.
pub struct ChannelPort {
    config: ChannelConfig,
    io_timeout: Duration,
    state: PortState,
}

impl ChannelPort {
    /// Bring up (when requested) and open the transport for one channel
    ///
    /// Never fails: a channel that cannot be brought up or opened is logged
    /// and returned disabled.
    pub async fn open(
        config: ChannelConfig,
        connector: &dyn Connector,
        bring_up: Option<&dyn BringUp>,
        io_timeout: Duration,
    ) -> Self {
        if let Some(bring_up) = bring_up {
            if let Err(source) = bring_up.bring_up(&config).await {
                let err = TransportError::BringUp {
                    interface: config.interface_name.clone(),
                    source,
                };
                warn!("{err}");
                warn!("{} (channel {}) disabled", config.interface_name, config.channel_id);
                return Self::disabled(config, io_timeout);
            }
        }

        match connector.open(&config).await {
            Ok(transport) => Self::enabled(config, transport, io_timeout),
            Err(source) => {
                let err = TransportError::Open {
                    interface: config.interface_name.clone(),
                    source,
                };
                warn!("{err}");
                warn!("{} (channel {}) disabled", config.interface_name, config.channel_id);
                Self::disabled(config, io_timeout)
            }
        }
    }

    pub fn enabled(config: ChannelConfig, transport: Box<dyn CanInterface>, io_timeout: Duration) -> Self {
        Self {
            config,
            io_timeout,
            state: PortState::Enabled {
                transport,
                stats: PortStats::default(),
            },
        }
    }

    pub fn disabled(config: ChannelConfig, io_timeout: Duration) -> Self {
        Self {
            config,
            io_timeout,
            state: PortState::Disabled {
                stats: PortStats::default(),
            },
        }
    }

    pub fn channel_id(&self) -> u8 {
        self.config.channel_id
    }

    pub fn interface_name(&self) -> &str {
        &self.config.interface_name
    }

    /// True while a transport handle is held
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, PortState::Enabled { .. })
    }

    pub fn stats(&self) -> PortStats {
        match &self.state {
            PortState::Enabled { stats, .. } | PortState::Disabled { stats } => *stats,
        }
    }

    pub fn status(&self) -> PortStatus {
        let stats = self.stats();
        PortStatus {
            channel_id: self.config.channel_id,
            interface: self.config.interface_name.clone(),
            sent: stats.sent,
            received: stats.received,
            enabled: self.is_enabled(),
        }
    }

    /// Transmit a frame; false if the port is disabled or the send failed
    pub async fn send(&mut self, frame: &Frame) -> bool {
        let PortState::Enabled { transport, stats } = &mut self.state else {
            return false;
        };

        match tokio::time::timeout(self.io_timeout, transport.send(frame)).await {
            Ok(Ok(())) => {
                stats.sent += 1;
                debug!("{} send: {}", self.config.interface_name, frame);
                true
            }
            Ok(Err(source)) => {
                self.disable(TransportError::Io {
                    interface: self.config.interface_name.clone(),
                    operation: "send",
                    source,
                });
                false
            }
            Err(_) => {
                self.disable(TransportError::Timeout {
                    interface: self.config.interface_name.clone(),
                    operation: "send",
                    after: self.io_timeout,
                });
                false
            }
        }
    }

    /// Wait up to `timeout` for a frame; None if disabled, idle or failed
    pub async fn recv(&mut self, timeout: Duration) -> Option<Frame> {
        let PortState::Enabled { transport, stats } = &mut self.state else {
            return None;
        };

        let bound = timeout + self.io_timeout;
        match tokio::time::timeout(bound, transport.receive(timeout)).await {
            Ok(Ok(Some(frame))) => {
                stats.received += 1;
                debug!("{} recv: {}", self.config.interface_name, frame);
                Some(frame)
            }
            Ok(Ok(None)) => None,
            Ok(Err(source)) => {
                self.disable(TransportError::Io {
                    interface: self.config.interface_name.clone(),
                    operation: "recv",
                    source,
                });
                None
            }
            Err(_) => {
                self.disable(TransportError::Timeout {
                    interface: self.config.interface_name.clone(),
                    operation: "recv",
                    after: bound,
                });
                None
            }
        }
    }

    /// Release the transport, keeping the counters
    pub fn disable(&mut self, cause: TransportError) {
        warn!("{cause}");
        warn!("{}: disabled", self.config.interface_name);
        let stats = self.stats();
        self.state = PortState::Disabled { stats };
    }

    /// Close the transport at the end of a session
    pub async fn close(&mut self) {
        if let PortState::Enabled { transport, .. } = &mut self.state {
            match tokio::time::timeout(self.io_timeout, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("{}: close failed: {}", self.config.interface_name, e),
                Err(_) => debug!("{}: close timed out", self.config.interface_name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BringUpError;
    use crate::hardware::mock::{MockBehavior, MockConnector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const IO_TIMEOUT: Duration = Duration::from_millis(100);

    fn config(channel_id: u8, name: &str) -> ChannelConfig {
        ChannelConfig {
            channel_id,
            interface_name: name.to_string(),
            bit_rate: 500_000,
        }
    }

    struct CountingBringUp {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BringUp for CountingBringUp {
        async fn bring_up(&self, _config: &ChannelConfig) -> Result<(), BringUpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BringUpError::Spawn {
                    command: "ip link set can0 down".into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "ip: not found"),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_success_and_failure() {
        let connector = MockConnector::new()
            .with_behavior("mock1", MockBehavior { fail_open: true, ..Default::default() });

        let port = ChannelPort::open(config(0, "mock0"), &connector, None, IO_TIMEOUT).await;
        assert!(port.is_enabled());

        let port = ChannelPort::open(config(1, "mock1"), &connector, None, IO_TIMEOUT).await;
        assert!(!port.is_enabled());
        assert_eq!(port.stats(), PortStats::default());
    }

    #[tokio::test]
    async fn test_bring_up_runs_once_before_open() {
        let connector = MockConnector::new();
        let bring_up = CountingBringUp { calls: AtomicUsize::new(0), fail: false };

        let port = ChannelPort::open(config(0, "mock0"), &connector, Some(&bring_up), IO_TIMEOUT).await;
        assert!(port.is_enabled());
        assert_eq!(bring_up.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_bring_up_disables_port() {
        let connector = MockConnector::new();
        let bring_up = CountingBringUp { calls: AtomicUsize::new(0), fail: true };

        let port = ChannelPort::open(config(0, "mock0"), &connector, Some(&bring_up), IO_TIMEOUT).await;
        assert!(!port.is_enabled());
        assert_eq!(bring_up.calls.load(Ordering::SeqCst), 1);
        assert!(connector.log().opened().is_empty());
    }

    #[tokio::test]
    async fn test_send_counts_and_failure_is_permanent() {
        let connector = MockConnector::new()
            .with_behavior("mock0", MockBehavior { fail_send_at: Some(2), ..Default::default() });
        let log = connector.log();
        let mut port = ChannelPort::open(config(0, "mock0"), &connector, None, IO_TIMEOUT).await;
        let frame = Frame::new(0.0, 0, 0x100, vec![1]);

        assert!(port.send(&frame).await);
        assert!(port.send(&frame).await);
        assert_eq!(port.stats().sent, 2);

        assert!(!port.send(&frame).await);
        assert!(!port.is_enabled());
        assert_eq!(port.stats().sent, 2);

        // Later sends never reach the transport
        assert!(!port.send(&frame).await);
        assert_eq!(log.sent_on("mock0"), 2);
        assert!(!port.status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_times_out_and_disables() {
        let connector = MockConnector::new().with_behavior(
            "mock0",
            MockBehavior {
                send_delays: vec![Duration::from_secs(1)],
                ..Default::default()
            },
        );
        let mut port = ChannelPort::open(config(0, "mock0"), &connector, None, IO_TIMEOUT).await;

        assert!(!port.send(&Frame::new(0.0, 0, 0x100, vec![])).await);
        assert!(!port.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_counts_and_idle_is_not_an_error() {
        let connector = MockConnector::new().with_behavior(
            "mock0",
            MockBehavior {
                inject: vec![Frame::new(0.0, 0, 0x200, vec![7])],
                ..Default::default()
            },
        );
        let mut port = ChannelPort::open(config(0, "mock0"), &connector, None, IO_TIMEOUT).await;

        let frame = port.recv(Duration::from_millis(10)).await.unwrap();
        assert_eq!(frame.id, 0x200);
        assert!(port.recv(Duration::from_millis(10)).await.is_none());
        assert!(port.is_enabled());
        assert_eq!(port.stats(), PortStats { sent: 0, received: 1 });
    }

    #[tokio::test]
    async fn test_recv_failure_disables() {
        let connector = MockConnector::new()
            .with_behavior("mock0", MockBehavior { fail_receive_at: Some(0), ..Default::default() });
        let mut port = ChannelPort::open(config(0, "mock0"), &connector, None, IO_TIMEOUT).await;

        assert!(port.recv(Duration::ZERO).await.is_none());
        assert!(!port.is_enabled());
        assert!(!port.send(&Frame::new(0.0, 0, 0x100, vec![])).await);
    }

    #[tokio::test]
    async fn test_disabled_port_is_inert() {
        let mut port = ChannelPort::disabled(config(3, "can3"), IO_TIMEOUT);
        assert!(!port.send(&Frame::new(0.0, 3, 0x100, vec![])).await);
        assert!(port.recv(Duration::ZERO).await.is_none());
        assert_eq!(port.channel_id(), 3);
        assert_eq!(port.interface_name(), "can3");
    }
}
