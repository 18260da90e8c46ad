//! Status channel messages
//!
//! The device connects to the status port and writes one JSON object per
//! line. The `type` field selects the message kind; everything else is
//! device-defined.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use std::net::Ipv4Addr;

use crate::error::ProtocolError;

/// Hardware section of a status report
///
/// Fields the device sends with an unexpected type read as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HardwareStatus {
    #[serde(deserialize_with = "lenient::flag")]
    pub as7341_led: Option<bool>,
    #[serde(deserialize_with = "lenient::number")]
    pub as7341_bright: Option<u32>,
    #[serde(deserialize_with = "lenient::flag")]
    pub uv_led: Option<bool>,
    #[serde(deserialize_with = "lenient::number")]
    pub uv_bright: Option<u32>,
    #[serde(deserialize_with = "lenient::flag")]
    pub buzzer: Option<bool>,
    /// Sensor initialised
    #[serde(deserialize_with = "lenient::flag")]
    pub sensor: Option<bool>,
    #[serde(deserialize_with = "lenient::text")]
    pub stream_mode: Option<String>,
    #[serde(deserialize_with = "lenient::flag")]
    pub stream_paused: Option<bool>,
    #[serde(deserialize_with = "lenient::number")]
    pub current_count: Option<u64>,
    #[serde(deserialize_with = "lenient::number")]
    pub target_count: Option<u32>,
    #[serde(deserialize_with = "lenient::number")]
    pub remaining: Option<u64>,
}

/// Identity and status carried by `connection` and `status` messages
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceReport {
    #[serde(deserialize_with = "lenient::text")]
    pub ip: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub device_ip: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub device: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub firmware: Option<String>,
    #[serde(deserialize_with = "lenient::section")]
    pub status: HardwareStatus,
}

impl DeviceReport {
    /// Device IPv4 address from `ip`, falling back to `device_ip`
    pub fn address(&self) -> Option<Ipv4Addr> {
        [self.ip.as_deref(), self.device_ip.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|s| s.trim().parse::<Ipv4Addr>().ok())
    }
}

/// Completion notice for a fixed-count acquisition
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamCompletion {
    #[serde(deserialize_with = "lenient::count")]
    pub total_packets: u64,
    #[serde(deserialize_with = "lenient::count")]
    pub target_count: u64,
    #[serde(deserialize_with = "lenient::count")]
    pub actual_count: u64,
}

/// Classified status channel message
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMessage {
    /// Device announces its identity and address
    Connection(DeviceReport),
    /// Snapshot of device state
    Status(DeviceReport),
    /// Fixed-count acquisition finished
    StreamComplete(StreamCompletion),
}

impl StatusMessage {
    /// Parse one line. `Ok(None)` for well-formed JSON with an unknown or
    /// missing `type`.
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(line).map_err(|e| ProtocolError::MalformedJson {
            reason: e.to_string(),
            raw: line.to_string(),
        })?;

        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Ok(None),
        };

        let message = match kind.as_str() {
            "connection" => StatusMessage::Connection(decode(value, "connection")?),
            "status" => StatusMessage::Status(decode(value, "status")?),
            "stream_complete" => StatusMessage::StreamComplete(decode(value, "stream_complete")?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    value: Value,
    field: &'static str,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|_| ProtocolError::InvalidField { field })
}

/// Field decoders that never fail on a wrongly typed value
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Bool(b) => Some(b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Some(true),
                "false" | "0" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    fn unsigned(value: &Value) -> Option<u64> {
        let float = match value {
            Value::Number(n) => match n.as_u64() {
                Some(v) => return Some(v),
                None => n.as_f64()?,
            },
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        (float.is_finite() && float >= 0.0 && float <= u64::MAX as f64).then(|| float.round() as u64)
    }

    pub fn number<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
    {
        let value = Value::deserialize(d)?;
        Ok(unsigned(&value).and_then(|v| T::try_from(v).ok()))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(number(d)?.unwrap_or_default())
    }

    /// Nested object; anything that is not a usable object reads as default
    pub fn section<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Value::deserialize(d)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

/// Accumulates stream bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-empty line with surrounding whitespace trimmed
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buf.iter().position(|&b| b == b'\n')?;
            let line = self.buf.split_to(end);
            self.buf.advance(1);

            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    /// Bytes waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection() {
        let line = r#"{"type":"connection","ip":"192.168.137.50","device":"AS7341_Sensor_Device","firmware":"2.0.0"}"#;
        match StatusMessage::parse(line).unwrap() {
            Some(StatusMessage::Connection(report)) => {
                assert_eq!(report.address(), Some(Ipv4Addr::new(192, 168, 137, 50)));
                assert_eq!(report.firmware.as_deref(), Some("2.0.0"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_snapshot() {
        let line = r#"{"type":"status","device_ip":"10.0.0.9","status":{"as7341_led":true,"as7341_bright":12,"uv_led":false,"stream_mode":"fixed","stream_paused":true,"target_count":50}}"#;
        let Some(StatusMessage::Status(report)) = StatusMessage::parse(line).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(report.address(), Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(report.status.as7341_led, Some(true));
        assert_eq!(report.status.as7341_bright, Some(12));
        assert_eq!(report.status.stream_mode.as_deref(), Some("fixed"));
        assert_eq!(report.status.target_count, Some(50));
        assert_eq!(report.status.buzzer, None);
    }

    #[test]
    fn test_parse_stream_complete() {
        let line = r#"{"type":"stream_complete","total_packets":120,"target_count":100,"actual_count":100}"#;
        assert_eq!(
            StatusMessage::parse(line).unwrap(),
            Some(StatusMessage::StreamComplete(StreamCompletion {
                total_packets: 120,
                target_count: 100,
                actual_count: 100,
            }))
        );
    }

    #[test]
    fn test_connection_with_numeric_firmware_still_announces() {
        let line = r#"{"type":"connection","ip":"192.168.137.50","device":"AS7341_Sensor_Device","firmware":2}"#;
        let Some(StatusMessage::Connection(report)) = StatusMessage::parse(line).unwrap() else {
            panic!("expected connection");
        };
        assert_eq!(report.address(), Some(Ipv4Addr::new(192, 168, 137, 50)));
        assert_eq!(report.firmware.as_deref(), Some("2"));
    }

    #[test]
    fn test_null_status_section_reads_as_default() {
        let line = r#"{"type":"connection","device_ip":"192.168.137.50","status":null}"#;
        let Some(StatusMessage::Connection(report)) = StatusMessage::parse(line).unwrap() else {
            panic!("expected connection");
        };
        assert_eq!(report.address(), Some(Ipv4Addr::new(192, 168, 137, 50)));
        assert_eq!(report.status, HardwareStatus::default());
    }

    #[test]
    fn test_status_fields_decode_leniently() {
        let line = r#"{"type":"status","status":{"as7341_bright":12.0,"uv_bright":"7","as7341_led":1,"uv_led":"off","target_count":-5,"stream_mode":["x"]}}"#;
        let Some(StatusMessage::Status(report)) = StatusMessage::parse(line).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(report.status.as7341_bright, Some(12));
        assert_eq!(report.status.uv_bright, Some(7));
        assert_eq!(report.status.as7341_led, Some(true));
        assert_eq!(report.status.uv_led, Some(false));
        assert_eq!(report.status.target_count, None);
        assert_eq!(report.status.stream_mode, None);
    }

    #[test]
    fn test_unknown_type_ignored() {
        assert_eq!(StatusMessage::parse(r#"{"type":"other"}"#).unwrap(), None);
        assert_eq!(StatusMessage::parse(r#"{"hello":1}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            StatusMessage::parse("{not json"),
            Err(ProtocolError::MalformedJson { .. })
        ));
    }

    #[test]
    fn test_line_buffer_splits_partial_lines() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"{\"a\":1}\n{\"b\"");
        assert_eq!(buffer.next_line().as_deref(), Some("{\"a\":1}"));
        assert_eq!(buffer.next_line(), None);
        assert_eq!(buffer.pending(), 4);

        buffer.extend(b":2}\r\n\n");
        assert_eq!(buffer.next_line().as_deref(), Some("{\"b\":2}"));
        assert_eq!(buffer.next_line(), None);
        assert_eq!(buffer.pending(), 0);
    }
}
