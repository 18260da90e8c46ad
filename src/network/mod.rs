//! Network channels to the device
//!
//! Each channel runs on its own thread with short socket timeouts and
//! reports everything it sees as a [`ChannelEvent`]. None of them touch
//! controller state.

pub mod command;
pub mod shutdown;
pub mod socket;
pub mod status;
pub mod telemetry;

use crossbeam_channel::{Sender, TrySendError};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use crate::data::SpectralSample;
use crate::protocol::{DeviceReport, StreamCompletion};

pub use command::{CommandClient, ConnectionState, HeartbeatAction, HeartbeatTracker};
pub use shutdown::ShutdownToken;
pub use status::StatusServer;
pub use telemetry::{LivenessWatchdog, TelemetryReceiver};

/// Capacity of the worker → controller event queue
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Which channel produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Status,
    Telemetry,
    Command,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKind::Status => "Status Channel",
            ChannelKind::Telemetry => "Telemetry",
            ChannelKind::Command => "Command Channel",
        })
    }
}

/// Everything the network workers report to the controller
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A listener started or failed
    Service {
        channel: ChannelKind,
        ok: bool,
        message: String,
    },
    /// `connection` message from the device
    DeviceAnnounced {
        report: DeviceReport,
        peer: SocketAddr,
    },
    /// `status` message from the device
    DeviceStatus(DeviceReport),
    /// `stream_complete` message from the device
    StreamComplete(StreamCompletion),
    /// Valid telemetry datagram
    Sample(SpectralSample),
    /// Telemetry stream went up or down
    StreamLiveness(bool),
    /// Command channel connected or lost
    CommandConnectivity { connected: bool, device: Ipv4Addr },
    /// Line received on the command channel
    CommandResponse(String),
    HeartbeatSent,
    /// Malformed payload; the channel keeps running
    ParseError { channel: ChannelKind, message: String },
}

/// Queue an event without blocking the worker
pub(crate) fn emit(events: &Sender<ChannelEvent>, event: ChannelEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            tracing::warn!("Event queue full, dropping {:?}", event);
        }
        Err(TrySendError::Disconnected(_)) => {
            tracing::debug!("Event consumer gone");
        }
    }
}
