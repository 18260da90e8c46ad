//! Outbound device commands
//!
//! A command is a flat JSON object sent as one line. The device never tags
//! its replies, so there is nothing to correlate: whatever line comes back
//! next is treated as the reply to the latest command.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::constants::{MAX_BRIGHTNESS, MIN_BRIGHTNESS, MIN_STREAM_INTERVAL_MS};
use crate::error::CommandError;

pub const KEY_TYPE: &str = "type";
pub const KEY_AS7341_LED: &str = "as7341Led";
pub const KEY_AS7341_BRIGHTNESS: &str = "as7341Brightness";
pub const KEY_UV_LED: &str = "uvLed";
pub const KEY_UV_BRIGHTNESS: &str = "uvBrightness";
pub const KEY_BUZZER: &str = "buzzer";
pub const KEY_DATA_STREAM: &str = "dataStream";
pub const KEY_STREAM_MODE: &str = "streamMode";
pub const KEY_STREAM_COUNT: &str = "streamCount";
pub const KEY_STREAM_PAUSE: &str = "streamPause";
pub const KEY_STREAM_RESET: &str = "streamReset";
pub const KEY_STREAM_INTERVAL: &str = "streamInterval";
pub const KEY_GET_DEVICE_STATUS: &str = "getDeviceStatus";
pub const KEY_REBOOT: &str = "reboot";

/// Data stream mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Stream until told to stop
    #[default]
    Continuous,
    /// Stop after a target packet count
    Fixed,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Continuous => "continuous",
            StreamMode::Fixed => "fixed",
        }
    }

    /// Parse the firmware's spelling; anything unknown is continuous
    pub fn from_wire(s: &str) -> Self {
        if s.eq_ignore_ascii_case("fixed") {
            StreamMode::Fixed
        } else {
            StreamMode::Continuous
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject brightness values outside 1-20
pub fn validate_brightness(level: u8) -> Result<u8, CommandError> {
    if (MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&level) {
        Ok(level)
    } else {
        Err(CommandError::BrightnessOutOfRange(level))
    }
}

/// Reject stream intervals below the firmware floor
pub fn validate_interval(interval_ms: u32) -> Result<u32, CommandError> {
    if interval_ms < MIN_STREAM_INTERVAL_MS {
        Err(CommandError::IntervalBelowMinimum {
            requested: interval_ms,
            minimum: MIN_STREAM_INTERVAL_MS,
        })
    } else {
        Ok(interval_ms)
    }
}

/// Flat key/value command, serialized as a single JSON line
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(Map<String, Value>);

impl Command {
    /// Empty command; combine fields with the builder methods
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from an arbitrary caller-supplied mapping
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// `{"type":"heartbeat"}`
    pub fn heartbeat() -> Self {
        Self::new().with(KEY_TYPE, "heartbeat")
    }

    /// Set an arbitrary key
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn led(self, on: bool) -> Self {
        self.with(KEY_AS7341_LED, on)
    }

    pub fn led_brightness(self, level: u8) -> Result<Self, CommandError> {
        let level = validate_brightness(level)?;
        Ok(self.with(KEY_AS7341_BRIGHTNESS, level))
    }

    pub fn uv_led(self, on: bool) -> Self {
        self.with(KEY_UV_LED, on)
    }

    pub fn uv_brightness(self, level: u8) -> Result<Self, CommandError> {
        let level = validate_brightness(level)?;
        Ok(self.with(KEY_UV_BRIGHTNESS, level))
    }

    pub fn buzzer(self, on: bool) -> Self {
        self.with(KEY_BUZZER, on)
    }

    pub fn data_stream(self, on: bool) -> Self {
        self.with(KEY_DATA_STREAM, on)
    }

    pub fn stream_mode(self, mode: StreamMode) -> Self {
        self.with(KEY_STREAM_MODE, mode.as_str())
    }

    pub fn stream_count(self, count: u32) -> Self {
        self.with(KEY_STREAM_COUNT, count)
    }

    pub fn stream_pause(self, paused: bool) -> Self {
        self.with(KEY_STREAM_PAUSE, paused)
    }

    pub fn stream_reset(self) -> Self {
        self.with(KEY_STREAM_RESET, true)
    }

    pub fn stream_interval(self, interval_ms: u32) -> Result<Self, CommandError> {
        let interval_ms = validate_interval(interval_ms)?;
        Ok(self.with(KEY_STREAM_INTERVAL, interval_ms))
    }

    pub fn get_device_status(self) -> Self {
        self.with(KEY_GET_DEVICE_STATUS, true)
    }

    pub fn reboot(self) -> Self {
        self.with(KEY_REBOOT, true)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Boolean value of `key`, if present and boolean
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.get(KEY_TYPE).and_then(Value::as_str) == Some("heartbeat")
    }

    /// JSON text terminated by a line break
    pub fn to_line(&self) -> String {
        let mut line = Value::Object(self.0.clone()).to_string();
        line.push('\n');
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_line() {
        assert_eq!(Command::heartbeat().to_line(), "{\"type\":\"heartbeat\"}\n");
        assert!(Command::heartbeat().is_heartbeat());
    }

    #[test]
    fn test_combined_stream_command() {
        let cmd = Command::new()
            .data_stream(true)
            .stream_pause(true)
            .stream_mode(StreamMode::Fixed)
            .stream_count(100)
            .stream_interval(500)
            .unwrap();

        let parsed: Value = serde_json::from_str(cmd.to_line().trim_end()).unwrap();
        assert_eq!(parsed["dataStream"], true);
        assert_eq!(parsed["streamPause"], true);
        assert_eq!(parsed["streamMode"], "fixed");
        assert_eq!(parsed["streamCount"], 100);
        assert_eq!(parsed["streamInterval"], 500);
    }

    #[test]
    fn test_interval_floor() {
        assert_eq!(
            Command::new().stream_interval(300).unwrap_err(),
            CommandError::IntervalBelowMinimum {
                requested: 300,
                minimum: 400
            }
        );
        assert!(Command::new().stream_interval(400).is_ok());
    }

    #[test]
    fn test_brightness_bounds() {
        assert!(Command::new().led_brightness(0).is_err());
        assert!(Command::new().uv_brightness(21).is_err());
        let cmd = Command::new().led_brightness(20).unwrap();
        assert_eq!(cmd.get(KEY_AS7341_BRIGHTNESS), Some(&Value::from(20)));
    }

    #[test]
    fn test_line_has_single_terminator() {
        let line = Command::new().led(true).uv_led(false).to_line();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_stream_mode_wire() {
        assert_eq!(StreamMode::from_wire("fixed"), StreamMode::Fixed);
        assert_eq!(StreamMode::from_wire("continuous"), StreamMode::Continuous);
        assert_eq!(StreamMode::from_wire("bogus"), StreamMode::Continuous);
    }
}
