//! Telemetry datagram decoding
//!
//! Each UDP datagram is a JSON object:
//! `{"t": <timestamp>, "d": [F1..F8], "c": <packet counter>, "sc": <stream count>}`
//! with `sc` optional.

use serde_json::Value;
use std::net::IpAddr;

use crate::constants::CHANNEL_COUNT;
use crate::data::SpectralSample;
use crate::error::ProtocolError;

/// Decode one datagram into a sample
///
/// Malformed JSON yields `MalformedJson`; a well-formed object without
/// `t`, `d` or `c` yields `MissingField`. A short channel array is padded
/// with zeros.
pub fn parse_datagram(data: &[u8], source: Option<IpAddr>) -> Result<SpectralSample, ProtocolError> {
    let text = String::from_utf8_lossy(data);
    let text = text.trim();
    let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson {
        reason: e.to_string(),
        raw: text.to_string(),
    })?;

    let timestamp = value.get("t").ok_or(ProtocolError::MissingField("t"))?;
    let channels = value.get("d").ok_or(ProtocolError::MissingField("d"))?;
    let packet = value.get("c").ok_or(ProtocolError::MissingField("c"))?;

    let timestamp = as_counter(timestamp).ok_or(ProtocolError::InvalidField { field: "t" })?;
    let packet_count = as_counter(packet).ok_or(ProtocolError::InvalidField { field: "c" })?;
    let stream_count = value.get("sc").and_then(as_counter).unwrap_or(0);

    let values = channels
        .as_array()
        .ok_or(ProtocolError::InvalidField { field: "d" })?;
    let mut readings = [0.0; CHANNEL_COUNT];
    for (slot, v) in readings.iter_mut().zip(values.iter()) {
        *slot = v.as_f64().unwrap_or(0.0);
    }

    Ok(SpectralSample::new(
        timestamp,
        packet_count,
        stream_count,
        readings,
        source,
    ))
}

// Counters arrive as integers but some firmware builds send floats.
fn as_counter(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}
