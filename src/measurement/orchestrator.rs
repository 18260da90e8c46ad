//! Three-phase measurement state machine
//!
//! ```text
//! Idle ──start──> LedOnly ──> UvOnly ──> LedUv ──> Idle
//!                    │           │          │
//!                    └───────────┴──────────┴──cancel / timeout──> Idle
//! ```
//!
//! The orchestrator never sleeps. Every wait is a [`MeasurementStep`]
//! handed to the host's scheduler together with the run generation; a step
//! whose generation no longer matches the active run is ignored, so
//! continuations left over from a cancelled run cannot touch a newer one.

use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::config::MeasurementConfig;
use crate::data::SampleCache;
use crate::error::{CommandError, MeasurementError};
use crate::measurement::phase::{MeasurementPhase, MeasurementRecord, PhaseBuffer};
use crate::protocol::Command;

/// Side effects the orchestrator needs from its owner
pub trait MeasurementHost {
    /// Write a command to the device immediately
    fn send(&mut self, cmd: Command) -> Result<(), CommandError>;

    /// Deliver `step` back to [`Orchestrator::on_step`] after `delay`
    fn schedule(&mut self, delay: Duration, generation: u64, step: MeasurementStep);
}

/// Timer-driven continuation of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementStep {
    /// Switch on the phase's illumination
    EnterPhase,
    /// Illumination settled; take the watermark and start polling
    BeginCollection,
    /// Look for a sample newer than the watermark
    Poll,
}

/// Externally visible orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorState {
    Idle,
    LedOnly,
    UvOnly,
    LedUv,
}

impl From<MeasurementPhase> for OrchestratorState {
    fn from(phase: MeasurementPhase) -> Self {
        match phase {
            MeasurementPhase::LedOnly => OrchestratorState::LedOnly,
            MeasurementPhase::UvOnly => OrchestratorState::UvOnly,
            MeasurementPhase::LedUv => OrchestratorState::LedUv,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Idle => f.write_str("Idle"),
            OrchestratorState::LedOnly => f.write_str("LED Only"),
            OrchestratorState::UvOnly => f.write_str("UV Only"),
            OrchestratorState::LedUv => f.write_str("LED+UV"),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        generation: u64,
        records: Vec<MeasurementRecord>,
        /// At least one phase timed out short of its target
        partial: bool,
    },
    Failed {
        generation: u64,
        phase: MeasurementPhase,
        error: MeasurementError,
    },
}

#[derive(Debug)]
struct ActiveRun {
    generation: u64,
    phase: MeasurementPhase,
    buffer: PhaseBuffer,
    records: Vec<MeasurementRecord>,
    watermark: u64,
    retries: u32,
    /// Stream was paused at start and must be paused again at the end
    repause_stream: bool,
}

/// Measurement run state machine
#[derive(Debug)]
pub struct Orchestrator {
    config: MeasurementConfig,
    generation: u64,
    run: Option<ActiveRun>,
    completed_runs: u64,
}

impl Orchestrator {
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            config,
            generation: 0,
            run: None,
            completed_runs: 0,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.run
            .as_ref()
            .map(|run| run.phase.into())
            .unwrap_or(OrchestratorState::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Generation of the active run, if any
    pub fn active_generation(&self) -> Option<u64> {
        self.run.as_ref().map(|run| run.generation)
    }

    pub fn completed_runs(&self) -> u64 {
        self.completed_runs
    }

    /// Begin a run: all lights off, resume a paused stream, settle
    ///
    /// `stream_paused` is the device's current pause state; a paused
    /// stream is resumed for the run and paused again when it ends.
    pub fn start<H: MeasurementHost>(
        &mut self,
        host: &mut H,
        stream_paused: bool,
    ) -> Result<u64, MeasurementError> {
        if self.run.is_some() {
            return Err(MeasurementError::AlreadyRunning);
        }

        host.send(Command::new().led(false))
            .map_err(|_| MeasurementError::DeviceOffline)?;
        send_logged(host, Command::new().uv_led(false));
        if stream_paused {
            send_logged(host, Command::new().stream_pause(false));
        }

        self.generation += 1;
        let generation = self.generation;
        let phase = MeasurementPhase::LedOnly;
        self.run = Some(ActiveRun {
            generation,
            phase,
            buffer: PhaseBuffer::new(phase, self.config.samples_per_phase),
            records: Vec::with_capacity(MeasurementPhase::ALL.len()),
            watermark: 0,
            retries: 0,
            repause_stream: stream_paused,
        });

        tracing::info!("[Measurement] run {} started", generation);
        host.schedule(self.config.settle_delay(), generation, MeasurementStep::EnterPhase);
        Ok(generation)
    }

    /// Abort the active run; lights off, no records
    pub fn cancel<H: MeasurementHost>(&mut self, host: &mut H) -> Option<RunOutcome> {
        let phase = self.run.as_ref()?.phase;
        tracing::info!("[Measurement] run cancelled during {}", phase);
        Some(self.abort(host, MeasurementError::Cancelled))
    }

    /// Advance the run on a scheduled step
    pub fn on_step<H: MeasurementHost>(
        &mut self,
        host: &mut H,
        cache: &SampleCache,
        generation: u64,
        step: MeasurementStep,
    ) -> Option<RunOutcome> {
        let run = match self.run.as_mut() {
            Some(run) if run.generation == generation => run,
            _ => {
                tracing::debug!("[Measurement] ignoring stale {:?} from run {}", step, generation);
                return None;
            }
        };

        match step {
            MeasurementStep::EnterPhase => {
                let phase = run.phase;
                tracing::info!("[Measurement] {} phase", phase);
                if phase.uses_led() {
                    send_logged(host, Command::new().led(true));
                }
                if phase.uses_uv() {
                    send_logged(host, Command::new().uv_led(true));
                }
                host.schedule(self.config.settle_delay(), generation, MeasurementStep::BeginCollection);
                None
            }
            MeasurementStep::BeginCollection => {
                run.watermark = cache.watermark();
                run.retries = 0;
                tracing::debug!("[Measurement] {} watermark {}", run.phase, run.watermark);
                self.poll(host, cache)
            }
            MeasurementStep::Poll => self.poll(host, cache),
        }
    }

    fn poll<H: MeasurementHost>(&mut self, host: &mut H, cache: &SampleCache) -> Option<RunOutcome> {
        let run = self.run.as_mut()?;
        let generation = run.generation;

        let fresh = cache
            .latest()
            .filter(|sample| sample.packet_count > run.watermark)
            .cloned();

        if let Some(sample) = fresh {
            run.watermark = sample.packet_count;
            run.retries = 0;
            let index = run.buffer.push(sample);
            tracing::debug!(
                "[Measurement] {} sample {}/{}",
                run.phase,
                index + 1,
                self.config.samples_per_phase
            );

            if run.buffer.is_full() {
                return self.finish_phase(host, false);
            }
            host.schedule(self.config.sample_poll_delay(), generation, MeasurementStep::Poll);
            return None;
        }

        if run.retries < self.config.max_retries {
            run.retries += 1;
            tracing::debug!(
                "[Measurement] {} waiting for data ({}/{})",
                run.phase,
                run.retries,
                self.config.max_retries
            );
            host.schedule(self.config.retry_delay(), generation, MeasurementStep::Poll);
            return None;
        }

        tracing::warn!("[Measurement] {} timed out with {} samples", run.phase, run.buffer.len());
        self.finish_phase(host, true)
    }

    fn finish_phase<H: MeasurementHost>(&mut self, host: &mut H, timed_out: bool) -> Option<RunOutcome> {
        let run = self.run.as_mut()?;
        let phase = run.phase;

        if timed_out && run.buffer.is_empty() {
            return Some(self.abort(host, MeasurementError::PhaseTimedOut(phase)));
        }

        match phase {
            MeasurementPhase::LedOnly => send_logged(host, Command::new().led(false)),
            MeasurementPhase::UvOnly => send_logged(host, Command::new().uv_led(false)),
            MeasurementPhase::LedUv => {
                send_logged(host, Command::new().led(false));
                send_logged(host, Command::new().uv_led(false));
            }
        }

        let next_buffer = phase
            .next()
            .map(|next| PhaseBuffer::new(next, self.config.samples_per_phase));
        let done = match next_buffer {
            Some(buffer) => std::mem::replace(&mut run.buffer, buffer),
            None => std::mem::replace(&mut run.buffer, PhaseBuffer::new(phase, 0)),
        };
        tracing::info!("[Measurement] {} phase collected {} samples", phase, done.len());
        run.records.push(done.into_record(Local::now()));

        match phase.next() {
            Some(next) => {
                run.phase = next;
                run.retries = 0;
                let generation = run.generation;
                host.schedule(self.config.inter_phase_delay(), generation, MeasurementStep::EnterPhase);
                None
            }
            None => {
                let run = self.run.take()?;
                if run.repause_stream {
                    send_logged(host, Command::new().stream_pause(true));
                }
                self.completed_runs += 1;
                let partial = run.records.iter().any(|r| !r.is_complete());
                tracing::info!(
                    "[Measurement] run {} complete{}",
                    run.generation,
                    if partial { " (partial)" } else { "" }
                );
                Some(RunOutcome::Completed {
                    generation: run.generation,
                    records: run.records,
                    partial,
                })
            }
        }
    }

    fn abort<H: MeasurementHost>(&mut self, host: &mut H, error: MeasurementError) -> RunOutcome {
        let run = self.run.take();
        send_logged(host, Command::new().led(false));
        send_logged(host, Command::new().uv_led(false));

        let (generation, phase) = match run {
            Some(run) => {
                if run.repause_stream {
                    send_logged(host, Command::new().stream_pause(true));
                }
                (run.generation, run.phase)
            }
            None => (self.generation, MeasurementPhase::LedOnly),
        };

        tracing::warn!("[Measurement] run {} aborted: {}", generation, error);
        RunOutcome::Failed {
            generation,
            phase,
            error,
        }
    }
}

fn send_logged<H: MeasurementHost>(host: &mut H, cmd: Command) {
    if let Err(e) = host.send(cmd) {
        tracing::warn!("[Measurement] command not sent: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHANNEL_COUNT;
    use crate::data::SpectralSample;
    use crate::protocol::command::{KEY_AS7341_LED, KEY_STREAM_PAUSE, KEY_UV_LED};

    #[derive(Default)]
    struct FakeHost {
        sent: Vec<Command>,
        scheduled: Vec<(Duration, u64, MeasurementStep)>,
        offline: bool,
    }

    impl MeasurementHost for FakeHost {
        fn send(&mut self, cmd: Command) -> Result<(), CommandError> {
            if self.offline {
                return Err(CommandError::NotConnected);
            }
            self.sent.push(cmd);
            Ok(())
        }

        fn schedule(&mut self, delay: Duration, generation: u64, step: MeasurementStep) {
            self.scheduled.push((delay, generation, step));
        }
    }

    impl FakeHost {
        fn pop(&mut self) -> (u64, MeasurementStep) {
            let (_, generation, step) = self.scheduled.remove(0);
            (generation, step)
        }

        /// Illumination changes as (key, on) pairs
        fn lights(&self) -> Vec<(&'static str, bool)> {
            self.sent
                .iter()
                .flat_map(|cmd| {
                    [("LED", KEY_AS7341_LED), ("UV", KEY_UV_LED)]
                        .into_iter()
                        .filter_map(move |(name, key)| cmd.flag(key).map(|on| (name, on)))
                })
                .collect()
        }
    }

    fn config() -> MeasurementConfig {
        MeasurementConfig {
            samples_per_phase: 5,
            max_retries: 10,
            ..Default::default()
        }
    }

    fn push(cache: &mut SampleCache, packet: u64, value: f64) {
        cache.push(SpectralSample::new(packet, packet, 0, [value; CHANNEL_COUNT], None));
    }

    /// Drive a run to completion, feeding a fresh sample before every poll
    fn drive(orch: &mut Orchestrator, host: &mut FakeHost, cache: &mut SampleCache) -> RunOutcome {
        let mut packet = cache.watermark();
        loop {
            let (generation, step) = host.pop();
            if step == MeasurementStep::Poll {
                packet += 1;
                push(cache, packet, packet as f64);
            }
            if let Some(outcome) = orch.on_step(host, cache, generation, step) {
                return outcome;
            }
        }
    }

    #[test]
    fn test_full_run_order_and_commands() {
        let mut orch = Orchestrator::new(config());
        let mut host = FakeHost::default();
        let mut cache = SampleCache::new(100);
        push(&mut cache, 1, 0.0);

        orch.start(&mut host, false).unwrap();
        assert_eq!(orch.state(), OrchestratorState::LedOnly);

        let outcome = drive(&mut orch, &mut host, &mut cache);
        let records = match outcome {
            RunOutcome::Completed {
                records, partial, ..
            } => {
                assert!(!partial);
                records
            }
            other => panic!("unexpected {:?}", other),
        };

        let phases: Vec<_> = records.iter().map(|r| r.phase).collect();
        assert_eq!(phases, MeasurementPhase::ALL.to_vec());
        assert!(records.iter().all(|r| r.samples.len() == 5));

        assert_eq!(
            host.lights(),
            vec![
                ("LED", false),
                ("UV", false),
                ("LED", true),
                ("LED", false),
                ("UV", true),
                ("UV", false),
                ("LED", true),
                ("UV", true),
                ("LED", false),
                ("UV", false),
            ]
        );
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(orch.completed_runs(), 1);
    }

    #[test]
    fn test_samples_are_strictly_newer_than_watermark() {
        let mut orch = Orchestrator::new(config());
        let mut host = FakeHost::default();
        let mut cache = SampleCache::new(100);
        push(&mut cache, 7, 0.0);

        let generation = orch.start(&mut host, false).unwrap();
        let (_, step) = host.pop();
        orch.on_step(&mut host, &cache, generation, step);
        let (_, step) = host.pop();
        assert_eq!(step, MeasurementStep::BeginCollection);
        orch.on_step(&mut host, &cache, generation, step);

        // The pre-existing sample is not collected
        let (delay, _, step) = host.scheduled[0];
        assert_eq!(step, MeasurementStep::Poll);
        assert_eq!(delay, config().retry_delay());

        host.scheduled.clear();
        push(&mut cache, 8, 1.0);
        orch.on_step(&mut host, &cache, generation, MeasurementStep::Poll);
        let (delay, _, _) = host.scheduled[0];
        assert_eq!(delay, config().sample_poll_delay());
    }

    #[test]
    fn test_stall_aborts_without_records() {
        let mut orch = Orchestrator::new(config());
        let mut host = FakeHost::default();
        let cache = SampleCache::new(100);

        let generation = orch.start(&mut host, true).unwrap();
        let mut polls = 0;
        let outcome = loop {
            let (g, step) = host.pop();
            if step == MeasurementStep::Poll {
                polls += 1;
            }
            if let Some(outcome) = orch.on_step(&mut host, &cache, g, step) {
                break outcome;
            }
        };

        assert_eq!(polls, 10);
        match outcome {
            RunOutcome::Failed {
                generation: g,
                phase,
                error,
            } => {
                assert_eq!(g, generation);
                assert_eq!(phase, MeasurementPhase::LedOnly);
                assert_eq!(error, MeasurementError::PhaseTimedOut(MeasurementPhase::LedOnly));
            }
            other => panic!("unexpected {:?}", other),
        }

        let lights = host.lights();
        assert_eq!(&lights[lights.len() - 2..], &[("LED", false), ("UV", false)]);
        let last = host.sent.last().unwrap();
        assert_eq!(last.flag(KEY_STREAM_PAUSE), Some(true));
        assert!(!orch.is_running());
        assert_eq!(orch.completed_runs(), 0);
    }

    #[test]
    fn test_short_phase_advances_and_is_partial() {
        let mut orch = Orchestrator::new(config());
        let mut host = FakeHost::default();
        let mut cache = SampleCache::new(100);

        let generation = orch.start(&mut host, false).unwrap();
        let mut packet = 0;
        let mut led_only_samples = 0;
        let outcome = loop {
            let (g, step) = host.pop();
            let feed = match orch.state() {
                // Two samples then silence during LedOnly
                OrchestratorState::LedOnly => led_only_samples < 2,
                _ => true,
            };
            if feed && step == MeasurementStep::Poll {
                packet += 1;
                push(&mut cache, packet, 1.0);
                if orch.state() == OrchestratorState::LedOnly {
                    led_only_samples += 1;
                }
            }
            if let Some(outcome) = orch.on_step(&mut host, &cache, g, step) {
                break outcome;
            }
        };

        match outcome {
            RunOutcome::Completed {
                generation: g,
                records,
                partial,
            } => {
                assert_eq!(g, generation);
                assert!(partial);
                assert_eq!(records[0].samples.len(), 2);
                assert!(!records[0].is_complete());
                assert!(records[1].is_complete() && records[2].is_complete());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_start_rejected_and_cancel_invalidates_steps() {
        let mut orch = Orchestrator::new(config());
        let mut host = FakeHost::default();
        let mut cache = SampleCache::new(100);

        let first = orch.start(&mut host, false).unwrap();
        assert_eq!(orch.start(&mut host, false), Err(MeasurementError::AlreadyRunning));

        let outcome = orch.cancel(&mut host).unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                error: MeasurementError::Cancelled,
                ..
            }
        ));
        assert!(orch.cancel(&mut host).is_none());

        let second = orch.start(&mut host, false).unwrap();
        assert_ne!(first, second);

        // Stale step from the cancelled run is a no-op
        host.scheduled.clear();
        push(&mut cache, 1, 1.0);
        assert!(orch
            .on_step(&mut host, &cache, first, MeasurementStep::EnterPhase)
            .is_none());
        assert!(host.scheduled.is_empty());
        assert_eq!(orch.active_generation(), Some(second));
    }

    #[test]
    fn test_offline_start_fails() {
        let mut orch = Orchestrator::new(config());
        let mut host = FakeHost {
            offline: true,
            ..Default::default()
        };
        assert_eq!(orch.start(&mut host, false), Err(MeasurementError::DeviceOffline));
        assert!(!orch.is_running());
    }
}
