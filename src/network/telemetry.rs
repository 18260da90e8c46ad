//! Telemetry receiver: UDP spectral datagrams with a liveness watchdog
//!
//! The stream is declared down once no valid datagram has arrived for the
//! liveness threshold. The receive loop checks this on every read timeout,
//! and a second thread checks it on a fixed period so the down transition
//! is reported even while the receive call is blocked.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;
use crate::error::{NetworkError, ProtocolError};
use crate::network::shutdown::{join_with_timeout, ShutdownToken};
use crate::network::socket::{create_udp_socket, is_transient};
use crate::network::{emit, ChannelEvent, ChannelKind};
use crate::protocol::parse_datagram;

#[derive(Debug)]
struct WatchdogState {
    last_valid: Option<Instant>,
    alive: bool,
}

/// Tracks time since the last valid datagram
///
/// Reports only transitions, so repeated checks do not flood events.
#[derive(Debug)]
pub struct LivenessWatchdog {
    threshold: Duration,
    state: Mutex<WatchdogState>,
}

impl LivenessWatchdog {
    /// Starts in the down state
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: Mutex::new(WatchdogState {
                last_valid: None,
                alive: false,
            }),
        }
    }

    /// Record a valid datagram; true if the stream just came up
    pub fn mark_alive(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.last_valid = Some(now);
        let was_alive = state.alive;
        state.alive = true;
        !was_alive
    }

    /// True if the stream just went down
    pub fn check(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if !state.alive {
            return false;
        }
        let expired = state
            .last_valid
            .map(|t| now.saturating_duration_since(t) > self.threshold)
            .unwrap_or(true);
        if expired {
            state.alive = false;
        }
        expired
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Age of the last valid datagram
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.state
            .lock()
            .last_valid
            .map(|t| now.saturating_duration_since(t))
    }
}

/// UDP telemetry listener
pub struct TelemetryReceiver {
    bind_addr: SocketAddr,
    config: NetworkConfig,
    local_addr: Option<SocketAddr>,
    watchdog: Arc<LivenessWatchdog>,
    shutdown: ShutdownToken,
    thread_handles: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<ReceiverStats>>,
}

/// Counters kept by the receive loop
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
}

impl TelemetryReceiver {
    pub fn new(bind_addr: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            bind_addr,
            config: config.clone(),
            local_addr: None,
            watchdog: Arc::new(LivenessWatchdog::new(config.liveness_threshold())),
            shutdown: ShutdownToken::new(),
            thread_handles: Vec::new(),
            stats: Arc::new(Mutex::new(ReceiverStats::default())),
        }
    }

    /// Bind and start the receive loop and the watchdog timer
    pub fn start(&mut self, events: Sender<ChannelEvent>) -> Result<SocketAddr, NetworkError> {
        if !self.thread_handles.is_empty() {
            if let Some(addr) = self.local_addr {
                return Ok(addr);
            }
        }

        let socket = match create_udp_socket(
            self.bind_addr,
            self.config.recv_buffer_size,
            self.config.read_timeout(),
        ) {
            Ok(socket) => socket,
            Err(e) => {
                emit(
                    &events,
                    ChannelEvent::Service {
                        channel: ChannelKind::Telemetry,
                        ok: false,
                        message: e.to_string(),
                    },
                );
                return Err(e);
            }
        };
        let local_addr = socket.local_addr().map_err(|e| NetworkError::BindFailed {
            addr: self.bind_addr,
            reason: e.to_string(),
        })?;

        self.shutdown = ShutdownToken::new();
        self.watchdog = Arc::new(LivenessWatchdog::new(self.config.liveness_threshold()));

        let receive_loop = ReceiveLoop {
            socket,
            buffer_size: self.config.recv_buffer_size,
            watchdog: self.watchdog.clone(),
            shutdown: self.shutdown.clone(),
            events: events.clone(),
            stats: self.stats.clone(),
        };
        let receiver = thread::Builder::new()
            .name("telemetry-rx".into())
            .spawn(move || receive_loop.run())
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;
        self.thread_handles.push(receiver);

        let watchdog = self.watchdog.clone();
        let shutdown = self.shutdown.clone();
        let period = self.config.liveness_check_interval();
        let watchdog_events = events.clone();
        let timer = thread::Builder::new()
            .name("telemetry-watchdog".into())
            .spawn(move || {
                while shutdown.sleep(period) {
                    if watchdog.check(Instant::now()) {
                        tracing::warn!("[Telemetry] stream down (watchdog)");
                        emit(&watchdog_events, ChannelEvent::StreamLiveness(false));
                    }
                }
            })
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;
        self.thread_handles.push(timer);

        tracing::info!("[Telemetry] listening on {}", local_addr);
        emit(
            &events,
            ChannelEvent::Service {
                channel: ChannelKind::Telemetry,
                ok: true,
                message: format!("Telemetry listening on {}", local_addr),
            },
        );
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    pub fn stop(&mut self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.thread_handles.drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            join_with_timeout(handle, Duration::from_secs(5), "Telemetry");
        }
        tracing::info!("[Telemetry] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread_handles.iter().any(|h| !h.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn watchdog(&self) -> Arc<LivenessWatchdog> {
        self.watchdog.clone()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.lock().clone()
    }
}

impl Drop for TelemetryReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReceiveLoop {
    socket: UdpSocket,
    buffer_size: usize,
    watchdog: Arc<LivenessWatchdog>,
    shutdown: ShutdownToken,
    events: Sender<ChannelEvent>,
    stats: Arc<Mutex<ReceiverStats>>,
}

impl ReceiveLoop {
    fn run(self) {
        let mut buf = vec![0u8; self.buffer_size];

        while !self.shutdown.is_cancelled() {
            match self.socket.recv_from(&mut buf) {
                Ok((0, _)) => continue,
                Ok((n, from)) => self.handle_datagram(&buf[..n], from),
                Err(e) if is_transient(&e) => self.check_liveness(),
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!("[Telemetry] receive failed: {}", e);
                    self.check_liveness();
                    self.shutdown.sleep(Duration::from_millis(100));
                }
            }
        }
        tracing::debug!("[Telemetry] receive loop exited");
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        {
            let mut stats = self.stats.lock();
            stats.packets_received += 1;
            stats.bytes_received += data.len() as u64;
        }

        match parse_datagram(data, Some(from.ip())) {
            Ok(sample) => {
                if self.watchdog.mark_alive(Instant::now()) {
                    tracing::info!("[Telemetry] stream up from {}", from.ip());
                    emit(&self.events, ChannelEvent::StreamLiveness(true));
                }
                emit(&self.events, ChannelEvent::Sample(sample));
            }
            Err(e @ ProtocolError::MalformedJson { .. }) => {
                self.stats.lock().invalid_packets += 1;
                tracing::warn!("[Telemetry] {}", e);
                emit(
                    &self.events,
                    ChannelEvent::ParseError {
                        channel: ChannelKind::Telemetry,
                        message: e.to_string(),
                    },
                );
            }
            Err(e) => {
                self.stats.lock().invalid_packets += 1;
                tracing::debug!(
                    "[Telemetry] dropping datagram from {}: {} ({})",
                    from,
                    e,
                    String::from_utf8_lossy(data).trim()
                );
            }
        }
    }

    fn check_liveness(&self) {
        if self.watchdog.check(Instant::now()) {
            tracing::warn!("[Telemetry] stream down");
            emit(&self.events, ChannelEvent::StreamLiveness(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};

    #[test]
    fn test_watchdog_transitions() {
        let watchdog = LivenessWatchdog::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(!watchdog.check(t0));
        assert!(watchdog.mark_alive(t0));
        assert!(!watchdog.mark_alive(t0 + Duration::from_millis(10)));
        assert!(!watchdog.check(t0 + Duration::from_millis(100)));
        assert!(watchdog.check(t0 + Duration::from_millis(200)));
        assert!(!watchdog.check(t0 + Duration::from_millis(300)));
        assert!(!watchdog.is_alive());
        assert!(watchdog.mark_alive(t0 + Duration::from_millis(400)));
    }

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            read_timeout_ms: 20,
            liveness_threshold_ms: 150,
            liveness_check_interval_ms: 50,
            ..Default::default()
        }
    }

    fn recv_matching<F: Fn(&ChannelEvent) -> bool>(
        rx: &Receiver<ChannelEvent>,
        pred: F,
    ) -> ChannelEvent {
        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).expect("event");
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_receives_samples_and_detects_silence() {
        let (tx, rx) = bounded(64);
        let mut receiver = TelemetryReceiver::new("127.0.0.1:0".parse().unwrap(), &test_config());
        let addr = receiver.start(tx).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(br#"{"t":1}"#, addr).unwrap();
        sender.send_to(b"not json", addr).unwrap();
        sender
            .send_to(br#"{"t":5,"d":[1,2,3,4,5,6,7,8],"c":9}"#, addr)
            .unwrap();

        recv_matching(&rx, |e| {
            matches!(
                e,
                ChannelEvent::ParseError {
                    channel: ChannelKind::Telemetry,
                    ..
                }
            )
        });
        assert!(matches!(
            recv_matching(&rx, |e| matches!(e, ChannelEvent::StreamLiveness(_))),
            ChannelEvent::StreamLiveness(true)
        ));
        match recv_matching(&rx, |e| matches!(e, ChannelEvent::Sample(_))) {
            ChannelEvent::Sample(sample) => assert_eq!(sample.packet_count, 9),
            _ => unreachable!(),
        }

        assert!(matches!(
            recv_matching(&rx, |e| matches!(e, ChannelEvent::StreamLiveness(_))),
            ChannelEvent::StreamLiveness(false)
        ));

        let stats = receiver.stats();
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.invalid_packets, 2);
        receiver.stop();
        assert!(!receiver.is_running());
    }
}
