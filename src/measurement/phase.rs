//! Illumination phases and per-phase sample buffers

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use crate::constants::CHANNEL_COUNT;
use crate::data::{channel_means, SpectralSample};

/// One of the three illumination conditions sampled per run, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MeasurementPhase {
    LedOnly,
    UvOnly,
    LedUv,
}

impl MeasurementPhase {
    pub const ALL: [MeasurementPhase; 3] = [
        MeasurementPhase::LedOnly,
        MeasurementPhase::UvOnly,
        MeasurementPhase::LedUv,
    ];

    /// Phase that follows this one, `None` after the last
    pub fn next(&self) -> Option<MeasurementPhase> {
        match self {
            MeasurementPhase::LedOnly => Some(MeasurementPhase::UvOnly),
            MeasurementPhase::UvOnly => Some(MeasurementPhase::LedUv),
            MeasurementPhase::LedUv => None,
        }
    }

    /// `measurement_type` column value in the session log
    pub fn label(&self) -> &'static str {
        match self {
            MeasurementPhase::LedOnly => "LED Only",
            MeasurementPhase::UvOnly => "UV Only",
            MeasurementPhase::LedUv => "LED+UV",
        }
    }

    pub fn uses_led(&self) -> bool {
        matches!(self, MeasurementPhase::LedOnly | MeasurementPhase::LedUv)
    }

    pub fn uses_uv(&self) -> bool {
        matches!(self, MeasurementPhase::UvOnly | MeasurementPhase::LedUv)
    }
}

impl fmt::Display for MeasurementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Samples collected for one phase of the current run
#[derive(Debug, Clone)]
pub struct PhaseBuffer {
    phase: MeasurementPhase,
    target: usize,
    samples: Vec<SpectralSample>,
}

impl PhaseBuffer {
    pub fn new(phase: MeasurementPhase, target: usize) -> Self {
        Self {
            phase,
            target,
            samples: Vec::with_capacity(target),
        }
    }

    /// Append; returns the ordinal the sample received within the phase
    pub fn push(&mut self, sample: SpectralSample) -> usize {
        self.samples.push(sample);
        self.samples.len() - 1
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.target
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn phase(&self) -> MeasurementPhase {
        self.phase
    }

    pub fn into_record(self, completed_at: DateTime<Local>) -> MeasurementRecord {
        MeasurementRecord {
            phase: self.phase,
            means: channel_means(&self.samples),
            samples: self.samples,
            expected: self.target,
            completed_at,
        }
    }
}

/// Result of one phase: its samples and per-channel means
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub phase: MeasurementPhase,
    pub samples: Vec<SpectralSample>,
    /// `None` when no samples were collected
    pub means: Option<[f64; CHANNEL_COUNT]>,
    /// Samples the phase was asked for
    pub expected: usize,
    pub completed_at: DateTime<Local>,
}

impl MeasurementRecord {
    /// Collected the full target count
    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.expected
    }
}
