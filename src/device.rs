//! Local view of the connected device
//!
//! Updated in place from status snapshots and optimistically from every
//! command that was written successfully. Discarded when the device
//! address changes.

use serde::Serialize;
use serde_json::Value;
use std::net::Ipv4Addr;

use crate::constants::{MAX_BRIGHTNESS, MIN_BRIGHTNESS, MIN_STREAM_INTERVAL_MS};
use crate::protocol::command::*;
use crate::protocol::{DeviceReport, StreamMode};

/// One illumination channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Illumination {
    pub on: bool,
    /// 1-20
    pub brightness: u8,
}

impl Default for Illumination {
    fn default() -> Self {
        Self {
            on: false,
            brightness: 10,
        }
    }
}

/// Data stream configuration as last known
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamState {
    /// `dataStream` enabled
    pub active: bool,
    pub mode: StreamMode,
    /// Target packet count in fixed mode
    pub target_count: u32,
    pub paused: bool,
    pub interval_ms: u32,
    /// Last `sc` seen in telemetry or reported by the device
    pub current_count: u64,
    /// Fixed-count acquisition reported complete
    pub complete: bool,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            active: false,
            mode: StreamMode::Continuous,
            target_count: 100,
            paused: false,
            interval_ms: 1000,
            current_count: 0,
            complete: false,
        }
    }
}

impl StreamState {
    /// Packets left in fixed mode, 0 in continuous mode
    pub fn remaining(&self) -> u64 {
        match self.mode {
            StreamMode::Fixed => (self.target_count as u64).saturating_sub(self.current_count),
            StreamMode::Continuous => 0,
        }
    }
}

/// Identity and state of the single supported device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSession {
    pub ip: Ipv4Addr,
    pub device: String,
    pub firmware: String,
    pub led: Illumination,
    pub uv: Illumination,
    pub buzzer: bool,
    pub sensor_ready: bool,
    pub stream: StreamState,
}

impl DeviceSession {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            device: "AS7341_Sensor_Device".to_string(),
            firmware: String::new(),
            led: Illumination::default(),
            uv: Illumination::default(),
            buzzer: false,
            sensor_ready: false,
            stream: StreamState::default(),
        }
    }

    /// Merge a `connection` or `status` report; absent fields keep their value
    pub fn apply_report(&mut self, report: &DeviceReport) {
        if let Some(device) = &report.device {
            self.device = device.clone();
        }
        if let Some(firmware) = &report.firmware {
            self.firmware = firmware.clone();
        }

        let status = &report.status;
        if let Some(on) = status.as7341_led {
            self.led.on = on;
        }
        if let Some(level) = status.as7341_bright {
            self.led.brightness = clamp_brightness(level);
        }
        if let Some(on) = status.uv_led {
            self.uv.on = on;
        }
        if let Some(level) = status.uv_bright {
            self.uv.brightness = clamp_brightness(level);
        }
        if let Some(on) = status.buzzer {
            self.buzzer = on;
        }
        if let Some(ready) = status.sensor {
            self.sensor_ready = ready;
        }
        if let Some(mode) = &status.stream_mode {
            self.stream.mode = StreamMode::from_wire(mode);
        }
        if let Some(paused) = status.stream_paused {
            self.stream.paused = paused;
        }
        if let Some(count) = status.current_count {
            self.stream.current_count = count;
        }
        if let Some(target) = status.target_count {
            self.stream.target_count = target;
        }
    }

    /// Optimistically apply a command the device has not confirmed yet
    pub fn apply_command(&mut self, cmd: &Command) {
        if let Some(on) = cmd.flag(KEY_AS7341_LED) {
            self.led.on = on;
        }
        if let Some(level) = cmd.get(KEY_AS7341_BRIGHTNESS).and_then(Value::as_u64) {
            self.led.brightness = clamp_brightness(level as u32);
        }
        if let Some(on) = cmd.flag(KEY_UV_LED) {
            self.uv.on = on;
        }
        if let Some(level) = cmd.get(KEY_UV_BRIGHTNESS).and_then(Value::as_u64) {
            self.uv.brightness = clamp_brightness(level as u32);
        }
        if let Some(on) = cmd.flag(KEY_BUZZER) {
            self.buzzer = on;
        }
        if let Some(on) = cmd.flag(KEY_DATA_STREAM) {
            self.stream.active = on;
            if !on {
                self.stream.paused = false;
            }
        }
        if let Some(mode) = cmd.get(KEY_STREAM_MODE).and_then(Value::as_str) {
            self.stream.mode = StreamMode::from_wire(mode);
        }
        if let Some(count) = cmd.get(KEY_STREAM_COUNT).and_then(Value::as_u64) {
            self.stream.target_count = count.min(u32::MAX as u64) as u32;
        }
        if let Some(paused) = cmd.flag(KEY_STREAM_PAUSE) {
            self.stream.paused = paused;
            if !paused {
                self.stream.complete = false;
            }
        }
        if cmd.flag(KEY_STREAM_RESET) == Some(true) {
            self.stream.current_count = 0;
            self.stream.complete = false;
        }
        if let Some(interval) = cmd.get(KEY_STREAM_INTERVAL).and_then(Value::as_u64) {
            self.stream.interval_ms = (interval as u32).max(MIN_STREAM_INTERVAL_MS);
        }
    }

    /// Device finished a fixed-count acquisition and paused itself
    pub fn mark_stream_complete(&mut self) {
        self.stream.complete = true;
        self.stream.paused = true;
    }

    /// Track the stream counter carried by telemetry
    pub fn observe_stream_count(&mut self, count: u64) {
        self.stream.current_count = count;
    }
}

fn clamp_brightness(level: u32) -> u8 {
    level.clamp(MIN_BRIGHTNESS as u32, MAX_BRIGHTNESS as u32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HardwareStatus;

    fn session() -> DeviceSession {
        DeviceSession::new(Ipv4Addr::new(192, 168, 137, 50))
    }

    #[test]
    fn test_apply_report_keeps_absent_fields() {
        let mut device = session();
        device.buzzer = true;

        let report = DeviceReport {
            firmware: Some("2.1.0".into()),
            status: HardwareStatus {
                as7341_led: Some(true),
                uv_bright: Some(35),
                stream_mode: Some("fixed".into()),
                target_count: Some(20),
                ..Default::default()
            },
            ..Default::default()
        };
        device.apply_report(&report);

        assert_eq!(device.firmware, "2.1.0");
        assert!(device.led.on);
        assert_eq!(device.uv.brightness, 20);
        assert!(device.buzzer);
        assert_eq!(device.stream.mode, StreamMode::Fixed);
        assert_eq!(device.stream.target_count, 20);
    }

    #[test]
    fn test_apply_command_is_optimistic() {
        let mut device = session();
        let cmd = Command::new()
            .data_stream(true)
            .stream_pause(true)
            .stream_mode(StreamMode::Fixed)
            .stream_count(50)
            .led(true)
            .uv_brightness(5)
            .unwrap();
        device.apply_command(&cmd);

        assert!(device.stream.active);
        assert!(device.stream.paused);
        assert_eq!(device.stream.target_count, 50);
        assert!(device.led.on);
        assert_eq!(device.uv.brightness, 5);
    }

    #[test]
    fn test_stream_reset_and_remaining() {
        let mut device = session();
        device.apply_command(&Command::new().stream_mode(StreamMode::Fixed).stream_count(10));
        device.observe_stream_count(4);
        assert_eq!(device.stream.remaining(), 6);

        device.apply_command(&Command::new().stream_reset());
        assert_eq!(device.stream.remaining(), 10);
    }

    #[test]
    fn test_stream_complete_pauses() {
        let mut device = session();
        device.apply_command(&Command::new().data_stream(true));
        device.mark_stream_complete();
        assert!(device.stream.paused);
        assert!(device.stream.complete);

        device.apply_command(&Command::new().stream_pause(false));
        assert!(!device.stream.complete);
    }
}
