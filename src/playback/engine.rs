use crate::config::{ChannelMap, ReplayOptions};
use crate::core::Frame;
use crate::hardware::{BringUp, Connector};
use crate::playback::port::ChannelPort;
use crate::playback::status::{StatusSink, StatusSnapshot};
use crate::playback::{SessionState, StopReason};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Anchor of a session's timeline
///
/// Every frame's due time is measured from this fixed pair, never from the
/// previous frame, so lateness on one frame does not shift later ones.
#[derive(Debug, Clone, Copy)]
pub struct ReplaySession {
    /// Wall-clock instant the first frame was fetched
    pub epoch: Instant,
    /// Recorded timestamp of the first frame
    pub ts_start: f64,
}

impl ReplaySession {
    pub fn arm(first: &Frame) -> Self {
        Self {
            epoch: Instant::now(),
            ts_start: first.timestamp,
        }
    }

    /// Offset of a frame from the first frame, in recorded time
    pub fn recorded_offset(&self, frame: &Frame) -> Duration {
        Duration::try_from_secs_f64(frame.timestamp - self.ts_start).unwrap_or(Duration::ZERO)
    }

    /// How long to wait before `frame` is due; zero if it is due or late
    pub fn delay(&self, frame: &Frame, now: Instant) -> Duration {
        let elapsed_wall = now.saturating_duration_since(self.epoch);
        self.recorded_offset(frame).saturating_sub(elapsed_wall)
    }
}

/// How a session ended, with the final status
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub reason: StopReason,
    pub snapshot: StatusSnapshot,
}

/// Paces recorded frames onto the configured ports
///
/// Single-threaded: frames are slept for and dispatched strictly in source
/// order, one port at a time, on one shared timeline.
pub struct ReplayScheduler<S: StatusSink> {
    ports: Vec<ChannelPort>,
    sink: S,
    rx_poll: Option<Duration>,
    state: SessionState,
    session: Option<ReplaySession>,
    frames_dispatched: u64,
    frames_unrouted: u64,
}

impl<S: StatusSink> ReplayScheduler<S> {
    pub fn new(ports: Vec<ChannelPort>, rx_poll: Option<Duration>, sink: S) -> Self {
        Self {
            ports,
            sink,
            rx_poll,
            state: SessionState::Starting,
            session: None,
            frames_dispatched: 0,
            frames_unrouted: 0,
        }
    }

    /// Open a port for every configured channel, in configuration order
    pub async fn open(
        channels: &ChannelMap,
        connector: &dyn Connector,
        bring_up: Option<&dyn BringUp>,
        options: &ReplayOptions,
        sink: S,
    ) -> Self {
        let mut ports = Vec::with_capacity(channels.channels.len());
        for config in &channels.channels {
            ports.push(ChannelPort::open(config.clone(), connector, bring_up, options.io_timeout).await);
        }

        let scheduler = Self::new(ports, options.rx_poll, sink);
        let snapshot = scheduler.snapshot();
        info!("{} of {} CAN interfaces enabled", snapshot.enabled_ports(), snapshot.ports.len());
        scheduler
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ports(&self) -> &[ChannelPort] {
        &self.ports
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn any_enabled(&self) -> bool {
        self.ports.iter().any(|p| p.is_enabled())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            elapsed: self.session.map(|s| s.epoch.elapsed()).unwrap_or_default(),
            state: self.state,
            frames_dispatched: self.frames_dispatched,
            frames_unrouted: self.frames_unrouted,
            ports: self.ports.iter().map(|p| p.status()).collect(),
        }
    }

    /// Replay `frames` until the source runs dry, every port is disabled,
    /// or `cancel` fires
    ///
    /// Frames left in the source after an early stop are never pulled.
    pub async fn run<I>(&mut self, frames: I, cancel: &CancellationToken) -> ReplayOutcome
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut frames = frames.into_iter();

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Interrupted;
            }
            let Some(frame) = frames.next() else {
                break StopReason::Exhausted;
            };

            let session = match self.session {
                Some(session) => session,
                None => {
                    let session = ReplaySession::arm(&frame);
                    self.session = Some(session);
                    self.state = SessionState::Armed;
                    debug!("Session armed at recorded time {:.6}", session.ts_start);

                    if !self.any_enabled() {
                        break StopReason::AllPortsDisabled;
                    }
                    self.state = SessionState::Running;
                    session
                }
            };

            let delay = session.delay(&frame, Instant::now());
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => break StopReason::Interrupted,
                }
            }

            let send_failed = self.dispatch(&frame).await;
            let recv_failed = self.poll_receive().await;

            if (send_failed || recv_failed) && !self.any_enabled() {
                break StopReason::AllPortsDisabled;
            }
        };

        self.state = SessionState::Stopped;
        let snapshot = self.snapshot();
        self.sink.finish(&snapshot);

        match reason {
            StopReason::AllPortsDisabled => warn!("Stopping: {}", reason),
            _ => info!("Stopping: {}", reason),
        }
        ReplayOutcome { reason, snapshot }
    }

    /// Send `frame` on every enabled port of its channel; true if any send failed
    async fn dispatch(&mut self, frame: &Frame) -> bool {
        let mut matched = 0;
        let mut delivered = false;
        let mut failed = false;

        for port in self
            .ports
            .iter_mut()
            .filter(|p| p.is_enabled() && p.channel_id() == frame.channel)
        {
            matched += 1;
            if port.send(frame).await {
                delivered = true;
            } else {
                failed = true;
            }
        }

        if matched == 0 {
            self.frames_unrouted += 1;
            debug!("No enabled port for channel {}, frame skipped", frame.channel);
        }
        if delivered {
            self.frames_dispatched += 1;
            let snapshot = self.snapshot();
            self.sink.update(&snapshot);
        }
        failed
    }

    /// Poll every enabled port once for received frames; true if any receive failed
    async fn poll_receive(&mut self) -> bool {
        let Some(timeout) = self.rx_poll else {
            return false;
        };

        let mut failed = false;
        for port in self.ports.iter_mut().filter(|p| p.is_enabled()) {
            port.recv(timeout).await;
            failed |= !port.is_enabled();
        }
        failed
    }

    /// Close every transport still held
    pub async fn close(&mut self) {
        for port in &mut self.ports {
            port.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::hardware::mock::{MockBehavior, MockConnector};

    fn channels(names: &[(u8, &str)]) -> ChannelMap {
        ChannelMap {
            channels: names
                .iter()
                .map(|&(channel_id, name)| ChannelConfig {
                    channel_id,
                    interface_name: name.to_string(),
                    bit_rate: 500_000,
                })
                .collect(),
        }
    }

    fn frame(timestamp: f64, channel: u8) -> Frame {
        Frame::new(timestamp, channel, 0x100 + channel as u32, vec![channel])
    }

    fn scenario_frames() -> Vec<Frame> {
        vec![frame(0.0, 0), frame(0.01, 1), frame(0.02, 0)]
    }

    async fn scheduler(
        map: &ChannelMap,
        connector: &MockConnector,
        options: ReplayOptions,
    ) -> ReplayScheduler<Vec<StatusSnapshot>> {
        ReplayScheduler::open(map, connector, None, &options, Vec::new()).await
    }

    #[test]
    fn test_delay_against_fixed_epoch() {
        let session = ReplaySession { epoch: Instant::now(), ts_start: 10.0 };
        let f = frame(10.5, 0);

        assert_eq!(session.recorded_offset(&f), Duration::from_millis(500));
        assert_eq!(session.delay(&f, session.epoch), Duration::from_millis(500));
        assert_eq!(
            session.delay(&f, session.epoch + Duration::from_millis(200)),
            Duration::from_millis(300)
        );
        // Late frames go out at once, no catch-up
        assert_eq!(session.delay(&f, session.epoch + Duration::from_secs(2)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_ports_healthy() {
        let map = channels(&[(0, "mock0"), (1, "mock1")]);
        let connector = MockConnector::new();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let start = Instant::now();
        let outcome = sched.run(scenario_frames(), &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::Exhausted);
        assert_eq!(sched.state(), SessionState::Stopped);
        let port0 = outcome.snapshot.port(0).unwrap();
        let port1 = outcome.snapshot.port(1).unwrap();
        assert_eq!((port0.sent, port0.received), (2, 0));
        assert_eq!((port1.sent, port1.received), (1, 0));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_failing_to_open_is_never_sent_to() {
        let map = channels(&[(0, "mock0"), (1, "mock1")]);
        let connector = MockConnector::new()
            .with_behavior("mock1", MockBehavior { fail_open: true, ..Default::default() });
        let log = connector.log();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        assert!(!sched.ports()[1].is_enabled());
        let outcome = sched.run(scenario_frames(), &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::Exhausted);
        assert_eq!(log.sent_on("mock1"), 0);
        assert_eq!(outcome.snapshot.port(0).unwrap().sent, 2);
        assert!(!outcome.snapshot.port(1).unwrap().enabled);
        assert_eq!(outcome.snapshot.frames_unrouted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_port_first_send_fails() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new()
            .with_behavior("mock0", MockBehavior { fail_send_at: Some(0), ..Default::default() });
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let mut pulled = 0;
        let frames = vec![frame(0.0, 0), frame(0.01, 0), frame(0.02, 0)]
            .into_iter()
            .inspect(|_| pulled += 1);
        let outcome = sched.run(frames, &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::AllPortsDisabled);
        assert_eq!(pulled, 1);
        let port = outcome.snapshot.port(0).unwrap();
        assert!(!port.enabled);
        assert_eq!(port.sent, 0);

        let history = sched.sink();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_early_and_gaps_respected() {
        let map = channels(&[(0, "mock0"), (1, "mock1")]);
        let connector = MockConnector::new();
        let log = connector.log();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let frames = vec![frame(5.0, 0), frame(5.25, 1), frame(5.25, 0), frame(6.0, 1), frame(7.5, 0)];
        let start = Instant::now();
        sched.run(frames.clone(), &CancellationToken::new()).await;

        let sent = log.sent();
        assert_eq!(sent.len(), frames.len());
        for record in &sent {
            let offset = Duration::from_secs_f64(record.frame.timestamp - 5.0);
            assert!(record.at - start >= offset, "frame at {} sent early", record.frame.timestamp);
        }
        for pair in sent.windows(2) {
            let recorded = Duration::from_secs_f64(pair[1].frame.timestamp - pair[0].frame.timestamp);
            assert!(pair[1].at - pair[0].at >= recorded);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_frame_does_not_shift_later_frames() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new().with_behavior(
            "mock0",
            MockBehavior {
                send_delays: vec![Duration::from_millis(50)],
                ..Default::default()
            },
        );
        let log = connector.log();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let frames = vec![frame(0.0, 0), frame(0.01, 0), frame(0.1, 0), frame(0.11, 0)];
        let start = Instant::now();
        let outcome = sched.run(frames, &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::Exhausted);
        let at: Vec<Duration> = log.sent().iter().map(|r| r.at - start).collect();
        assert_eq!(at[0], Duration::from_millis(50));
        // Frame 2 was due at 10ms and goes out as soon as frame 1 returns
        assert_eq!(at[1], Duration::from_millis(50));
        // Frames 3 and 4 stay on schedule
        assert_eq!(at[2], Duration::from_millis(100));
        assert_eq!(at[3], Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_port_stays_disabled_while_others_continue() {
        let map = channels(&[(0, "mock0"), (1, "mock1")]);
        let connector = MockConnector::new()
            .with_behavior("mock1", MockBehavior { fail_send_at: Some(0), ..Default::default() });
        let log = connector.log();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let frames = vec![frame(0.0, 1), frame(0.01, 0), frame(0.02, 1), frame(0.03, 0)];
        let outcome = sched.run(frames, &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::Exhausted);
        assert_eq!(log.sent_on("mock1"), 0);
        assert!(!sched.ports()[1].is_enabled());
        assert_eq!(outcome.snapshot.port(0).unwrap().sent, 2);
        assert_eq!(outcome.snapshot.port(1).unwrap().sent, 0);
        // The first ch1 frame failed, the second found no enabled port
        assert_eq!(outcome.snapshot.frames_unrouted, 1);
        assert_eq!(outcome.snapshot.frames_dispatched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_channel_ids_fan_out() {
        let map = channels(&[(0, "mock0"), (0, "mock1")]);
        let connector = MockConnector::new();
        let log = connector.log();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        sched.run(vec![frame(0.0, 0), frame(0.01, 0)], &CancellationToken::new()).await;

        assert_eq!(log.sent_on("mock0"), 2);
        assert_eq!(log.sent_on("mock1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_enabled_port_at_start() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new()
            .with_behavior("mock0", MockBehavior { fail_open: true, ..Default::default() });
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let outcome = sched.run(scenario_frames(), &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::AllPortsDisabled);
        assert_eq!(outcome.snapshot.frames_dispatched, 0);
        assert_eq!(sched.sink().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_source() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let outcome = sched.run(Vec::new(), &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::Exhausted);
        assert_eq!(outcome.snapshot.state, SessionState::Stopped);
        assert_eq!(outcome.snapshot.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_after_each_dispatch_and_at_end() {
        let map = channels(&[(0, "mock0"), (1, "mock1")]);
        let connector = MockConnector::new();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        sched.run(scenario_frames(), &CancellationToken::new()).await;

        let history = sched.sink();
        assert_eq!(history.len(), 4);
        let sent0: Vec<u64> = history.iter().map(|s| s.port(0).unwrap().sent).collect();
        assert_eq!(sent0, vec![1, 1, 2, 2]);
        assert!(history[..3].iter().all(|s| s.state == SessionState::Running));
        assert_eq!(history[3].state, SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_pacing_sleep() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new();
        let mut sched = scheduler(&map, &connector, ReplayOptions::default()).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = sched.run(vec![frame(0.0, 0), frame(10.0, 0)], &cancel).await;

        assert_eq!(outcome.reason, StopReason::Interrupted);
        assert_eq!(outcome.snapshot.port(0).unwrap().sent, 1);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(sched.sink().last().unwrap().state, SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_polling_counts_frames() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new().with_behavior(
            "mock0",
            MockBehavior {
                inject: vec![frame(0.0, 0), frame(0.0, 0)],
                ..Default::default()
            },
        );
        let options = ReplayOptions {
            rx_poll: Some(Duration::from_millis(1)),
            ..Default::default()
        };
        let mut sched = scheduler(&map, &connector, options).await;

        let outcome = sched.run(scenario_frames(), &CancellationToken::new()).await;

        let port = outcome.snapshot.port(0).unwrap();
        assert_eq!(port.received, 2);
        assert_eq!(port.sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_triggers_liveness_check() {
        let map = channels(&[(0, "mock0")]);
        let connector = MockConnector::new()
            .with_behavior("mock0", MockBehavior { fail_receive_at: Some(0), ..Default::default() });
        let options = ReplayOptions {
            rx_poll: Some(Duration::from_millis(1)),
            ..Default::default()
        };
        let mut sched = scheduler(&map, &connector, options).await;

        let outcome = sched.run(scenario_frames(), &CancellationToken::new()).await;

        assert_eq!(outcome.reason, StopReason::AllPortsDisabled);
        let port = outcome.snapshot.port(0).unwrap();
        assert_eq!(port.sent, 1);
        assert!(!port.enabled);
    }
}
