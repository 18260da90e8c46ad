//! Wire formats of the three device channels

pub mod command;
pub mod status;
pub mod telemetry;

pub use command::{validate_brightness, validate_interval, Command, StreamMode};
pub use status::{DeviceReport, HardwareStatus, LineBuffer, StatusMessage, StreamCompletion};
pub use telemetry::parse_datagram;
