//! # Spectro Link
//!
//! Device communication and measurement orchestration for a networked
//! eight-channel optical sensor.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── DEVICE ─────────────────────────────────┐
//! │  status client ──┐        telemetry sender ──┐     command server (6688) │
//! └──────────────────┼───────────────────────────┼──────────────▲──────────┘
//!          TCP 6677  │                 UDP 6699  │              │ TCP
//!                    ▼                           ▼              │
//! ┌──────────────────────┐   ┌──────────────────────┐   ┌──────┴───────────┐
//! │ StatusServer thread  │   │ TelemetryReceiver    │   │ CommandClient    │
//! │ (network::status)    │   │ thread + watchdog    │   │ thread: connect, │
//! │ line-delimited JSON  │   │ (network::telemetry) │   │ heartbeat, read  │
//! └──────────┬───────────┘   └──────────┬───────────┘   └──────┬───────────┘
//!            │      ChannelEvent        │                      │
//!            └────────────┬─────────────┴──────────────────────┘
//!                         ▼  crossbeam channel
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Controller (single sequential consumer)                 │
//! │  DeviceSession · SampleCache/Recorder · Orchestrator · TimerQueue       │
//! └───────────────┬───────────────────────────────────────▲─────────────────┘
//!                 │ AppEvent                              │ ControlRequest
//!                 ▼                                       │
//!          presentation layer / console ──────────────────┘
//! ```
//!
//! Network workers never touch controller state; they only emit events.
//! Measurement phases advance on generation-tagged timer events that flow
//! through the same consumer loop.

pub mod config;
pub mod controller;
pub mod data;
pub mod device;
pub mod error;
pub mod measurement;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Protocol constants shared with the device firmware
pub mod constants {
    /// Port the device connects to for announcements and status
    pub const STATUS_PORT: u16 = 6677;

    /// Port the device streams spectral datagrams to
    pub const TELEMETRY_PORT: u16 = 6699;

    /// Port of the device's command server
    pub const COMMAND_PORT: u16 = 6688;

    /// Interval between heartbeat sends on the command channel
    pub const HEARTBEAT_INTERVAL_MS: u64 = 20_000;

    /// Silence after which the command channel reconnects
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

    /// Telemetry silence after which the stream is declared down
    pub const LIVENESS_THRESHOLD_MS: u64 = 5_000;

    /// Live sample cache capacity
    pub const MAX_DATA_CACHE: usize = 1000;

    /// Socket receive buffer size
    pub const RECV_BUFFER_SIZE: usize = 4096;

    /// Smallest stream interval the firmware accepts
    pub const MIN_STREAM_INTERVAL_MS: u32 = 400;

    /// Brightness bounds for both illumination channels
    pub const MIN_BRIGHTNESS: u8 = 1;
    pub const MAX_BRIGHTNESS: u8 = 20;

    /// Number of spectral channels per sample
    pub const CHANNEL_COUNT: usize = 8;

    /// Channel column names, 405-425 nm through 670-690 nm
    pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] =
        ["F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8"];
}
