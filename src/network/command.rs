//! Command channel: persistent outbound TCP client
//!
//! State machine: `Disconnected → Connecting → Connected`, back to
//! `Disconnected` on any I/O error, heartbeat timeout or stop. While the
//! client runs it reconnects forever with a fixed backoff.
//!
//! Commands are never queued. `send_cmd` writes immediately under the
//! writer lock or fails with [`CommandError::NotConnected`].

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;
use crate::error::{CommandError, NetworkError};
use crate::network::shutdown::{join_with_timeout, ShutdownToken};
use crate::network::socket::is_transient;
use crate::network::{emit, ChannelEvent};
use crate::protocol::Command;

/// Connection state of the command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// What the heartbeat schedule asks for at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Wait,
    Send,
    /// No successful send within the timeout; reconnect
    Expired,
}

/// Heartbeat schedule measured from the last successful send
///
/// This tracks our own ability to write, not device acknowledgement; the
/// device never answers heartbeats.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    interval: Duration,
    timeout: Duration,
    last_sent: Instant,
}

impl HeartbeatTracker {
    /// `now` counts as the last send, so the first heartbeat goes out one
    /// interval after connecting
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_sent: now,
        }
    }

    pub fn poll(&self, now: Instant) -> HeartbeatAction {
        let since = now.saturating_duration_since(self.last_sent);
        if since > self.timeout {
            HeartbeatAction::Expired
        } else if since >= self.interval {
            HeartbeatAction::Send
        } else {
            HeartbeatAction::Wait
        }
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }
}

struct Shared {
    state: AtomicU8,
    /// Write half of the live socket; at most one exists
    writer: Mutex<Option<TcpStream>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Drop the live socket and mark disconnected
    fn close(&self) {
        if let Some(stream) = self.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Write one line. The socket's write timeout bounds how long the
    /// writer lock is held; a timed-out or failed write drops the
    /// connection.
    fn write_line(&self, line: &str) -> Result<(), CommandError> {
        let mut writer = self.writer.lock();
        if self.state() != ConnectionState::Connected {
            return Err(CommandError::NotConnected);
        }
        let stream = writer.as_mut().ok_or(CommandError::NotConnected)?;
        match stream.write_all(line.as_bytes()).and_then(|_| stream.flush()) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(stream) = writer.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                self.set_state(ConnectionState::Disconnected);
                if is_transient(&e) {
                    Err(CommandError::WriteTimedOut)
                } else {
                    Err(CommandError::WriteFailed(e.to_string()))
                }
            }
        }
    }
}

/// Outbound command client for one device
pub struct CommandClient {
    device: Ipv4Addr,
    target: SocketAddr,
    config: NetworkConfig,
    shared: Arc<Shared>,
    shutdown: ShutdownToken,
    thread_handle: Option<JoinHandle<()>>,
}

impl CommandClient {
    pub fn new(device: Ipv4Addr, config: &NetworkConfig) -> Self {
        Self::with_target(
            device,
            SocketAddr::V4(SocketAddrV4::new(device, config.command_port)),
            config,
        )
    }

    /// Client for an explicit target address
    pub fn with_target(device: Ipv4Addr, target: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            device,
            target,
            config: config.clone(),
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                writer: Mutex::new(None),
            }),
            shutdown: ShutdownToken::new(),
            thread_handle: None,
        }
    }

    /// Start the connect/heartbeat/read loop
    pub fn start(&mut self, events: Sender<ChannelEvent>) -> Result<(), NetworkError> {
        if self.is_running() {
            return Ok(());
        }

        self.shutdown = ShutdownToken::new();
        let worker = CommandWorker {
            device: self.device,
            target: self.target,
            config: self.config.clone(),
            shared: self.shared.clone(),
            shutdown: self.shutdown.clone(),
            events,
        };

        let handle = thread::Builder::new()
            .name(format!("command-{}", self.device))
            .spawn(move || worker.run())
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;
        self.thread_handle = Some(handle);
        tracing::info!("[Command Channel] started, target {}", self.target);
        Ok(())
    }

    /// Serialize and write one command line
    pub fn send_cmd(&self, cmd: &Command) -> Result<(), CommandError> {
        if self.shutdown.is_cancelled() {
            return Err(CommandError::NotConnected);
        }
        let line = cmd.to_line();
        match self.shared.write_line(&line) {
            Ok(()) => {
                tracing::info!("[Command Channel] sent: {}", line.trim_end());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("[Command Channel] send failed: {}", e);
                Err(e)
            }
        }
    }

    /// Clear the running flag, force-close the socket and join the worker
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        self.shared.close();
        if let Some(handle) = self.thread_handle.take() {
            join_with_timeout(handle, Duration::from_secs(3), "Command Channel");
            tracing::info!("[Command Channel] stopped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled() && self.state() == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn device(&self) -> Ipv4Addr {
        self.device
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CommandWorker {
    device: Ipv4Addr,
    target: SocketAddr,
    config: NetworkConfig,
    shared: Arc<Shared>,
    shutdown: ShutdownToken,
    events: Sender<ChannelEvent>,
}

impl CommandWorker {
    fn run(self) {
        let mut attempt: u64 = 0;

        while !self.shutdown.is_cancelled() {
            attempt += 1;
            self.shared.set_state(ConnectionState::Connecting);
            tracing::info!("[Command Channel] connecting to {} (attempt {})", self.target, attempt);

            match TcpStream::connect_timeout(&self.target, self.config.connect_timeout()) {
                Ok(stream) => {
                    attempt = 0;
                    if let Err(e) = self.install(&stream) {
                        tracing::warn!("[Command Channel] cannot configure socket: {}", e);
                        self.shared.close();
                    } else {
                        tracing::info!("[Command Channel] connected to {}", self.target);
                        self.notify(true);
                        self.serve(stream);
                        self.shared.close();
                        self.notify(false);
                        tracing::info!("[Command Channel] connection to {} lost", self.target);
                    }
                }
                Err(e) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    tracing::warn!("[Command Channel] connect to {} failed: {}", self.target, e);
                }
            }

            if !self.shutdown.sleep(self.config.reconnect_backoff()) {
                break;
            }
        }

        self.shared.close();
        tracing::debug!("[Command Channel] worker exited");
    }

    fn install(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_read_timeout(Some(self.config.command_poll_timeout()))?;
        // Shared with the writer clone
        stream.set_write_timeout(Some(self.config.command_write_timeout()))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        *self.shared.writer.lock() = Some(writer);
        self.shared.set_state(ConnectionState::Connected);
        Ok(())
    }

    fn notify(&self, connected: bool) {
        emit(
            &self.events,
            ChannelEvent::CommandConnectivity {
                connected,
                device: self.device,
            },
        );
    }

    /// Heartbeat and read until the connection fails or we are stopped
    fn serve(&self, mut stream: TcpStream) {
        let mut heartbeat = HeartbeatTracker::new(
            self.config.heartbeat_interval(),
            self.config.heartbeat_timeout(),
            Instant::now(),
        );
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let heartbeat_line = Command::heartbeat().to_line();

        while !self.shutdown.is_cancelled() {
            if self.shared.state() != ConnectionState::Connected {
                return;
            }

            let now = Instant::now();
            match heartbeat.poll(now) {
                HeartbeatAction::Wait => {}
                HeartbeatAction::Send => match self.shared.write_line(&heartbeat_line) {
                    Ok(()) => {
                        heartbeat.record_sent(now);
                        tracing::debug!("[Command Channel] heartbeat sent");
                        emit(&self.events, ChannelEvent::HeartbeatSent);
                    }
                    Err(e) => {
                        tracing::warn!("[Command Channel] heartbeat failed: {}", e);
                        return;
                    }
                },
                HeartbeatAction::Expired => {
                    tracing::warn!("[Command Channel] heartbeat timeout, reconnecting");
                    return;
                }
            }

            match stream.read(&mut buf) {
                Ok(0) => {
                    tracing::info!("[Command Channel] device closed the connection");
                    return;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                        tracing::info!("[Command Channel] response: {}", line);
                        emit(&self.events, ChannelEvent::CommandResponse(line.to_string()));
                    }
                }
                Err(e) if is_transient(&e) => {}
                Err(e) => {
                    if !self.shutdown.is_cancelled() {
                        tracing::warn!("[Command Channel] read failed: {}", e);
                    }
                    return;
                }
            }
        }
    }
}
