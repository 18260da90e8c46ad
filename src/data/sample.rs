//! Spectral sample as received from the telemetry stream

use serde::Serialize;
use std::net::IpAddr;

use crate::constants::CHANNEL_COUNT;

/// One telemetry reading. Never mutated after the receiver builds it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralSample {
    /// Device clock timestamp
    pub timestamp: u64,
    /// Packet counter, monotonically increasing per device boot
    pub packet_count: u64,
    /// Stream sequence number in fixed mode, 0 otherwise
    pub stream_count: u64,
    /// Channel intensities F1..F8
    pub channels: [f64; CHANNEL_COUNT],
    /// Address the datagram came from
    #[serde(skip)]
    pub source: Option<IpAddr>,
}

impl SpectralSample {
    pub fn new(
        timestamp: u64,
        packet_count: u64,
        stream_count: u64,
        channels: [f64; CHANNEL_COUNT],
        source: Option<IpAddr>,
    ) -> Self {
        Self {
            timestamp,
            packet_count,
            stream_count,
            channels,
            source,
        }
    }
}

/// Per-channel arithmetic mean; `None` for an empty slice
pub fn channel_means(samples: &[SpectralSample]) -> Option<[f64; CHANNEL_COUNT]> {
    if samples.is_empty() {
        return None;
    }

    let mut sums = [0.0; CHANNEL_COUNT];
    for sample in samples {
        for (sum, value) in sums.iter_mut().zip(sample.channels.iter()) {
            *sum += value;
        }
    }

    let n = samples.len() as f64;
    Some(sums.map(|s| s / n))
}
