//! Error types for the device link

use std::net::SocketAddr;
use thiserror::Error;

use crate::measurement::MeasurementPhase;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Measurement error: {0}")]
    Measurement(#[from] MeasurementError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Socket-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Worker thread failed to start: {0}")]
    Spawn(String),
}

/// Payload decoding errors on any channel
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON parse failed: {reason} (raw: {raw})")]
    MalformedJson { reason: String, raw: String },

    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Field `{field}` has an unexpected type")]
    InvalidField { field: &'static str },
}

/// Errors raised when building or sending a device command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command channel is not connected")]
    NotConnected,

    #[error("Write to device failed: {0}")]
    WriteFailed(String),

    #[error("Write to device timed out")]
    WriteTimedOut,

    #[error("Brightness {0} outside 1-20")]
    BrightnessOutOfRange(u8),

    #[error("Stream interval {requested} ms is below the {minimum} ms minimum")]
    IntervalBelowMinimum { requested: u32, minimum: u32 },

    #[error("Operation requires fixed stream mode")]
    RequiresFixedMode,

    #[error("Data stream is not enabled")]
    StreamInactive,
}

/// Measurement orchestration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("A measurement run is already active")]
    AlreadyRunning,

    #[error("A measurement session is already active")]
    SessionActive,

    #[error("No measurement session is active")]
    NoSession,

    #[error("Device is not connected")]
    DeviceOffline,

    #[error("No samples arrived during {0} phase")]
    PhaseTimedOut(MeasurementPhase),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Nothing to save")]
    Empty,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
