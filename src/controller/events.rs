//! Messages between the controller and its presentation layer

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::constants::CHANNEL_COUNT;
use crate::data::SpectralSample;
use crate::device::DeviceSession;
use crate::error::MeasurementError;
use crate::measurement::MeasurementPhase;
use crate::network::telemetry::ReceiverStats;
use crate::network::{ChannelKind, ConnectionState};
use crate::protocol::{StreamCompletion, StreamMode};

/// Requests accepted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    /// Raw JSON object, sent verbatim
    SendRaw(String),
    SetLed(bool),
    SetLedBrightness(u8),
    SetUv(bool),
    SetUvBrightness(u8),
    SetBuzzer(bool),
    ToggleDataStream,
    SetStreamMode(StreamMode),
    SetStreamCount(u32),
    TogglePause,
    ResetStreamCount,
    SetStreamInterval(u32),
    GetDeviceStatus,
    Reboot,
    StartRecording,
    StopRecording,
    /// Save the last recording; `None` picks a timestamped name in the
    /// output directory
    SaveRecording(Option<PathBuf>),
    ClearCache,
    ClearRecording,
    StartInstantMeasurement,
    /// Interval and total duration in minutes
    StartRecurringSession { interval_min: u64, duration_min: u64 },
    StopRecurringSession,
    CancelMeasurement,
    /// Rebind the listening channels to a new local address
    SetLocalAddress(IpAddr),
    Stats,
    Shutdown,
}

impl ControlRequest {
    /// Short name for logs and rejections
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::SendRaw(_) => "send-raw",
            ControlRequest::SetLed(_) => "led",
            ControlRequest::SetLedBrightness(_) => "led-brightness",
            ControlRequest::SetUv(_) => "uv",
            ControlRequest::SetUvBrightness(_) => "uv-brightness",
            ControlRequest::SetBuzzer(_) => "buzzer",
            ControlRequest::ToggleDataStream => "toggle-stream",
            ControlRequest::SetStreamMode(_) => "stream-mode",
            ControlRequest::SetStreamCount(_) => "stream-count",
            ControlRequest::TogglePause => "toggle-pause",
            ControlRequest::ResetStreamCount => "reset-count",
            ControlRequest::SetStreamInterval(_) => "stream-interval",
            ControlRequest::GetDeviceStatus => "device-status",
            ControlRequest::Reboot => "reboot",
            ControlRequest::StartRecording => "start-recording",
            ControlRequest::StopRecording => "stop-recording",
            ControlRequest::SaveRecording(_) => "save-recording",
            ControlRequest::ClearCache => "clear-cache",
            ControlRequest::ClearRecording => "clear-recording",
            ControlRequest::StartInstantMeasurement => "measure",
            ControlRequest::StartRecurringSession { .. } => "start-session",
            ControlRequest::StopRecurringSession => "stop-session",
            ControlRequest::CancelMeasurement => "cancel-measurement",
            ControlRequest::SetLocalAddress(_) => "set-address",
            ControlRequest::Stats => "stats",
            ControlRequest::Shutdown => "shutdown",
        }
    }
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingStop {
    Requested,
    StreamComplete,
}

/// Per-phase means of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: MeasurementPhase,
    pub samples: usize,
    pub means: Option<[f64; CHANNEL_COUNT]>,
}

/// Counters reported on a `Stats` request
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub cache_len: usize,
    pub cache_capacity: usize,
    pub evicted: u64,
    pub recording: bool,
    pub recording_len: usize,
    pub completed_runs: u64,
    pub session_runs: u64,
    pub stream_alive: bool,
    #[serde(skip)]
    pub command_state: Option<ConnectionState>,
    pub packets_received: u64,
    pub invalid_packets: u64,
}

impl ControllerStats {
    pub(crate) fn with_receiver(mut self, stats: &ReceiverStats) -> Self {
        self.packets_received = stats.packets_received;
        self.invalid_packets = stats.invalid_packets;
        self
    }
}

/// Everything the controller reports outward
#[derive(Debug, Clone)]
pub enum AppEvent {
    ServiceStatus {
        channel: ChannelKind,
        ok: bool,
        message: String,
    },
    DeviceDiscovered {
        ip: Ipv4Addr,
        device: String,
        firmware: String,
    },
    StatusSnapshot(DeviceSession),
    TelemetrySample(SpectralSample),
    StreamLiveness(bool),
    StreamComplete(StreamCompletion),
    Connectivity {
        connected: bool,
        device: Ipv4Addr,
    },
    CommandResponse(String),
    CommandSendError(String),
    ParseError {
        channel: ChannelKind,
        message: String,
    },
    /// A request could not be carried out
    RequestRejected {
        request: &'static str,
        reason: String,
    },
    RecordingStopped {
        samples: usize,
        reason: RecordingStop,
    },
    RecordingSaved(PathBuf),
    MeasurementStarted {
        generation: u64,
    },
    MeasurementCompleted {
        generation: u64,
        run_index: u64,
        partial: bool,
        phases: Vec<PhaseSummary>,
    },
    MeasurementFailed {
        generation: u64,
        phase: MeasurementPhase,
        error: MeasurementError,
    },
    SessionStarted {
        recurring: bool,
    },
    SessionClosed {
        runs: u64,
        file: Option<PathBuf>,
    },
    Stats(ControllerStats),
}
