//! Measurement runs and sessions
//!
//! A run samples the sensor under three illumination phases in a fixed
//! order. Runs belong to a session, which is either one-shot or recurring
//! on a fixed interval for a fixed total duration.

pub mod orchestrator;
pub mod phase;
pub mod session;

pub use orchestrator::{MeasurementHost, MeasurementStep, Orchestrator, OrchestratorState, RunOutcome};
pub use phase::{MeasurementPhase, MeasurementRecord, PhaseBuffer};
pub use session::{CompletedRun, MeasurementSession, RecurringSchedule, SessionLog, SessionTick};
