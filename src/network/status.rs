//! Status channel: passive single-peer TCP listener
//!
//! The device connects here to announce itself and push status and
//! stream-completion messages. Only one device connection is served at a
//! time. A peer closing the connection is normal and is not reported;
//! device liveness is judged by the command channel.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::shutdown::{join_with_timeout, ShutdownToken};
use crate::network::socket::{create_listener, is_transient};
use crate::network::{emit, ChannelEvent, ChannelKind};
use crate::protocol::{LineBuffer, StatusMessage};

/// Pause between non-blocking accept polls
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Status channel listener
pub struct StatusServer {
    bind_addr: SocketAddr,
    read_timeout: Duration,
    recv_buffer_size: usize,
    local_addr: Option<SocketAddr>,
    shutdown: ShutdownToken,
    /// Clone of the connection being served, for force-close on stop
    active: Arc<Mutex<Option<TcpStream>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl StatusServer {
    pub fn new(bind_addr: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            bind_addr,
            read_timeout: config.read_timeout(),
            recv_buffer_size: config.recv_buffer_size,
            local_addr: None,
            shutdown: ShutdownToken::new(),
            active: Arc::new(Mutex::new(None)),
            thread_handle: None,
        }
    }

    /// Bind and start the accept loop
    pub fn start(&mut self, events: Sender<ChannelEvent>) -> Result<SocketAddr, NetworkError> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            return Ok(addr);
        }

        let listener = match create_listener(self.bind_addr) {
            Ok(listener) => listener,
            Err(e) => {
                emit(
                    &events,
                    ChannelEvent::Service {
                        channel: ChannelKind::Status,
                        ok: false,
                        message: e.to_string(),
                    },
                );
                return Err(e);
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed {
                addr: self.bind_addr,
                reason: e.to_string(),
            })?;

        self.shutdown = ShutdownToken::new();
        let worker = StatusWorker {
            listener,
            shutdown: self.shutdown.clone(),
            active: self.active.clone(),
            events: events.clone(),
            read_timeout: self.read_timeout,
            recv_buffer_size: self.recv_buffer_size,
        };

        let handle = thread::Builder::new()
            .name("status-channel".into())
            .spawn(move || worker.run())
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;

        tracing::info!("[Status Channel] listening on {}", local_addr);
        emit(
            &events,
            ChannelEvent::Service {
                channel: ChannelKind::Status,
                ok: true,
                message: format!("Status channel listening on {}", local_addr),
            },
        );

        self.local_addr = Some(local_addr);
        self.thread_handle = Some(handle);
        Ok(local_addr)
    }

    /// Stop accepting, close any active connection and join the worker
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(stream) = self.active.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.thread_handle.take() {
            join_with_timeout(handle, Duration::from_secs(5), "Status Channel");
            tracing::info!("[Status Channel] stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for StatusServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StatusWorker {
    listener: TcpListener,
    shutdown: ShutdownToken,
    active: Arc<Mutex<Option<TcpStream>>>,
    events: Sender<ChannelEvent>,
    read_timeout: Duration,
    recv_buffer_size: usize,
}

impl StatusWorker {
    fn run(self) {
        while !self.shutdown.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!("[Status Channel] device connected: {}", peer);
                    self.serve(stream, peer);
                }
                Err(e) if is_transient(&e) => {
                    self.shutdown.sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!("[Status Channel] accept failed: {}", e);
                    emit(
                        &self.events,
                        ChannelEvent::Service {
                            channel: ChannelKind::Status,
                            ok: false,
                            message: format!("Socket error: {}", e),
                        },
                    );
                    self.shutdown.sleep(ACCEPT_POLL);
                }
            }
        }
        tracing::debug!("[Status Channel] accept loop exited");
    }

    fn serve(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_read_timeout(Some(self.read_timeout)))
        {
            tracing::warn!("[Status Channel] cannot configure connection from {}: {}", peer, e);
            return;
        }
        match stream.try_clone() {
            Ok(clone) => *self.active.lock() = Some(clone),
            Err(e) => tracing::debug!("[Status Channel] no force-close handle: {}", e),
        }

        let mut lines = LineBuffer::new();
        let mut buf = vec![0u8; self.recv_buffer_size];

        while !self.shutdown.is_cancelled() {
            match stream.read(&mut buf) {
                Ok(0) => {
                    // Normal for this device; not a disconnect.
                    tracing::info!("[Status Channel] device closed connection: {}", peer);
                    break;
                }
                Ok(n) => {
                    lines.extend(&buf[..n]);
                    while let Some(line) = lines.next_line() {
                        self.dispatch(&line, peer);
                    }
                }
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    if !self.shutdown.is_cancelled() {
                        tracing::warn!("[Status Channel] read from {} failed: {}", peer, e);
                    }
                    break;
                }
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
        self.active.lock().take();
        tracing::info!("[Status Channel] finished serving {}", peer);
    }

    fn dispatch(&self, line: &str, peer: SocketAddr) {
        tracing::debug!("[Status Channel] received: {}", line);
        match StatusMessage::parse(line) {
            Ok(Some(StatusMessage::Connection(report))) => {
                emit(&self.events, ChannelEvent::DeviceAnnounced { report, peer });
            }
            Ok(Some(StatusMessage::Status(report))) => {
                emit(&self.events, ChannelEvent::DeviceStatus(report));
            }
            Ok(Some(StatusMessage::StreamComplete(done))) => {
                emit(&self.events, ChannelEvent::StreamComplete(done));
            }
            Ok(None) => tracing::debug!("[Status Channel] ignoring untyped message"),
            Err(e) => {
                tracing::warn!("[Status Channel] {}", e);
                emit(
                    &self.events,
                    ChannelEvent::ParseError {
                        channel: ChannelKind::Status,
                        message: e.to_string(),
                    },
                );
            }
        }
    }
}
