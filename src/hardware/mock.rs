use async_trait::async_trait;
use crate::config::ChannelConfig;
use crate::core::Frame;
use crate::hardware::can_interface::{CanInterface, CanResult, Connector};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted behaviour of one mock interface
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Refuse to open
    pub fail_open: bool,
    /// Zero-based send attempt that fails
    pub fail_send_at: Option<usize>,
    /// Zero-based receive attempt that fails
    pub fail_receive_at: Option<usize>,
    /// Time taken by each send attempt, by attempt index; later attempts are instant
    pub send_delays: Vec<Duration>,
    /// Frames waiting in the receive buffer
    pub inject: Vec<Frame>,
}

/// A frame accepted by a mock interface
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub interface: String,
    pub at: Instant,
    pub frame: Frame,
}

#[derive(Debug, Default)]
struct LogInner {
    opened: Vec<String>,
    sent: Vec<SentRecord>,
}

/// Shared record of everything mock interfaces did
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MockLog {
    fn with<T>(&self, f: impl FnOnce(&mut LogInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    /// Every accepted frame, in send order
    pub fn sent(&self) -> Vec<SentRecord> {
        self.with(|log| log.sent.clone())
    }

    /// Number of frames accepted by one interface
    pub fn sent_on(&self, interface: &str) -> usize {
        self.with(|log| log.sent.iter().filter(|r| r.interface == interface).count())
    }

    /// Interfaces successfully opened, in order
    pub fn opened(&self) -> Vec<String> {
        self.with(|log| log.opened.clone())
    }
}

/// Mock CAN interface for running without hardware
///
/// Accepts every frame unless scripted otherwise, and hands out injected
/// frames on receive.
pub struct MockCanInterface {
    name: String,
    behavior: MockBehavior,
    rx_buffer: VecDeque<Frame>,
    sends: usize,
    receives: usize,
    log: MockLog,
}

impl MockCanInterface {
    /// Create a new mock interface
    pub fn new(name: &str, behavior: MockBehavior, log: MockLog) -> Self {
        Self {
            name: name.to_string(),
            rx_buffer: behavior.inject.iter().cloned().collect(),
            behavior,
            sends: 0,
            receives: 0,
            log,
        }
    }
}

#[async_trait]
impl CanInterface for MockCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, frame: &Frame) -> CanResult<()> {
        let attempt = self.sends;
        self.sends += 1;

        if let Some(&delay) = self.behavior.send_delays.get(attempt) {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.fail_send_at == Some(attempt) {
            return Err(format!("{}: bus-off", self.name).into());
        }

        self.log.with(|log| {
            log.sent.push(SentRecord {
                interface: self.name.clone(),
                at: Instant::now(),
                frame: frame.clone(),
            })
        });
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> CanResult<Option<Frame>> {
        let attempt = self.receives;
        self.receives += 1;

        if self.behavior.fail_receive_at == Some(attempt) {
            return Err(format!("{}: controller error", self.name).into());
        }

        match self.rx_buffer.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}

/// Opens mock interfaces, each following its scripted behaviour
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    behaviors: HashMap<String, MockBehavior>,
    log: MockLog,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behaviour of one interface
    pub fn with_behavior(mut self, interface: &str, behavior: MockBehavior) -> Self {
        self.behaviors.insert(interface.to_string(), behavior);
        self
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, config: &ChannelConfig) -> CanResult<Box<dyn CanInterface>> {
        let behavior = self
            .behaviors
            .get(&config.interface_name)
            .cloned()
            .unwrap_or_default();

        if behavior.fail_open {
            return Err(format!("No such device: {}", config.interface_name).into());
        }

        self.log.with(|log| log.opened.push(config.interface_name.clone()));
        Ok(Box::new(MockCanInterface::new(
            &config.interface_name,
            behavior,
            self.log.clone(),
        )))
    }
}
