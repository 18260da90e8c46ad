//! The controller: single owner of all mutable state
//!
//! Network workers, the presentation layer and the controller's own timers
//! all feed one loop. Nothing else mutates the device session, the sample
//! cache, the recorder or the measurement state, so none of them need
//! locks.

pub mod console;
pub mod events;
pub mod timer;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::data::{export, save_samples, Recorder, SampleCache, SpectralSample};
use crate::device::{DeviceSession, StreamState};
use crate::error::{CommandError, MeasurementError, NetworkError};
use crate::measurement::{
    MeasurementHost, MeasurementSession, MeasurementStep, Orchestrator, RecurringSchedule,
    RunOutcome, SessionTick,
};
use crate::network::{
    ChannelEvent, CommandClient, StatusServer, TelemetryReceiver, EVENT_QUEUE_CAPACITY,
};
use crate::protocol::{Command, DeviceReport, StreamMode};

pub use events::{AppEvent, ControlRequest, ControllerStats, PhaseSummary, RecordingStop};
pub use timer::{Timer, TimerQueue};

/// Longest the loop blocks when no timer is pending
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Recurring-session supervisor period
const SESSION_TICK: Duration = Duration::from_secs(1);

/// Capacity of the controller → presentation queue
const APP_EVENT_CAPACITY: usize = 4096;

/// Presentation-side ends of the controller's queues
pub struct ControllerHandle {
    pub requests: Sender<ControlRequest>,
    pub events: Receiver<AppEvent>,
}

/// Adapter giving the orchestrator access to the command channel and timers
struct RunHost<'a> {
    command: Option<&'a CommandClient>,
    device: Option<&'a mut DeviceSession>,
    timers: &'a mut TimerQueue,
}

impl MeasurementHost for RunHost<'_> {
    fn send(&mut self, cmd: Command) -> Result<(), CommandError> {
        let client = self.command.ok_or(CommandError::NotConnected)?;
        client.send_cmd(&cmd)?;
        if let Some(device) = self.device.as_deref_mut() {
            device.apply_command(&cmd);
        }
        Ok(())
    }

    fn schedule(&mut self, delay: Duration, generation: u64, step: MeasurementStep) {
        self.timers
            .schedule_after(delay, Timer::Measurement { generation, step });
    }
}

/// Sequential consumer of channel events, requests and timers
pub struct Controller {
    config: AppConfig,
    local_ip: IpAddr,

    channel_tx: Sender<ChannelEvent>,
    channel_rx: Receiver<ChannelEvent>,
    requests: Receiver<ControlRequest>,
    outbound: Sender<AppEvent>,

    status: StatusServer,
    telemetry: TelemetryReceiver,
    command: Option<CommandClient>,

    device: Option<DeviceSession>,
    cache: SampleCache,
    recorder: Recorder,
    last_recording: Vec<SpectralSample>,
    stream_alive: bool,

    orchestrator: Orchestrator,
    session: Option<MeasurementSession>,
    timers: TimerQueue,
}

impl Controller {
    pub fn new(config: AppConfig) -> (Self, ControllerHandle) {
        let (channel_tx, channel_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let (request_tx, request_rx) = bounded(256);
        let (app_tx, app_rx) = bounded(APP_EVENT_CAPACITY);

        let local_ip = config.network.bind_address;
        let status = StatusServer::new(
            SocketAddr::new(local_ip, config.network.status_port),
            &config.network,
        );
        let telemetry = TelemetryReceiver::new(
            SocketAddr::new(local_ip, config.network.telemetry_port),
            &config.network,
        );

        let controller = Self {
            local_ip,
            channel_tx,
            channel_rx,
            requests: request_rx,
            outbound: app_tx,
            status,
            telemetry,
            command: None,
            device: None,
            cache: SampleCache::new(config.cache.capacity),
            recorder: Recorder::new(),
            last_recording: Vec::new(),
            stream_alive: false,
            orchestrator: Orchestrator::new(config.measurement.clone()),
            session: None,
            timers: TimerQueue::new(),
            config,
        };
        let handle = ControllerHandle {
            requests: request_tx,
            events: app_rx,
        };
        (controller, handle)
    }

    /// Start the status and telemetry listeners and the status query timer
    pub fn start(&mut self) -> Result<(), NetworkError> {
        tracing::info!("Starting network services on {}", self.local_ip);
        let status = self.status.start(self.channel_tx.clone());
        let telemetry = self.telemetry.start(self.channel_tx.clone());
        self.timers
            .schedule_after(self.config.measurement.status_query_interval(), Timer::StatusQuery);
        status?;
        telemetry?;
        Ok(())
    }

    /// Process events until a shutdown request or the request queue closes
    pub fn run(mut self) {
        let channel_rx = self.channel_rx.clone();
        let requests = self.requests.clone();

        loop {
            let wait = self
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT)
                .min(IDLE_WAIT);

            crossbeam_channel::select! {
                recv(channel_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_channel_event(event);
                    }
                }
                recv(requests) -> request => match request {
                    Ok(request) => {
                        if !self.handle_request(request) {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::info!("Request queue closed");
                        break;
                    }
                },
                default(wait) => {}
            }

            self.fire_due_timers(Instant::now());
        }

        self.shutdown();
    }

    /// Run every timer whose deadline has passed
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some(timer) = self.timers.pop_due(now) {
            self.handle_timer(timer);
        }
    }

    fn publish(&self, event: AppEvent) {
        match self.outbound.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("App event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn reject(&self, request: &'static str, reason: impl ToString) {
        let reason = reason.to_string();
        tracing::warn!("Request {} rejected: {}", request, reason);
        self.publish(AppEvent::RequestRejected { request, reason });
    }

    fn is_connected(&self) -> bool {
        self.command.as_ref().map(|c| c.is_connected()).unwrap_or(false)
    }

    /// Write a command and apply it to the device session on success
    fn send(&mut self, cmd: Command) -> Result<(), CommandError> {
        let result = match &self.command {
            Some(client) => client.send_cmd(&cmd),
            None => Err(CommandError::NotConnected),
        };
        match result {
            Ok(()) => {
                if let Some(device) = self.device.as_mut() {
                    device.apply_command(&cmd);
                }
                Ok(())
            }
            Err(e) => {
                self.publish(AppEvent::CommandSendError(format!("{}: {}", cmd, e)));
                Err(e)
            }
        }
    }

    // ---- channel events ----

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Service {
                channel,
                ok,
                message,
            } => self.publish(AppEvent::ServiceStatus {
                channel,
                ok,
                message,
            }),
            ChannelEvent::DeviceAnnounced { report, peer } => self.on_device_announced(report, peer),
            ChannelEvent::DeviceStatus(report) => {
                if let Some(device) = self.device.as_mut() {
                    device.apply_report(&report);
                    let snapshot = device.clone();
                    self.publish(AppEvent::StatusSnapshot(snapshot));
                } else {
                    tracing::debug!("Status report before any device announced");
                }
            }
            ChannelEvent::StreamComplete(done) => {
                tracing::info!(
                    "Stream complete: {} of {} packets",
                    done.actual_count,
                    done.target_count
                );
                if let Some(device) = self.device.as_mut() {
                    device.mark_stream_complete();
                }
                if self.recorder.is_recording() {
                    self.stop_recording(RecordingStop::StreamComplete);
                }
                self.publish(AppEvent::StreamComplete(done));
            }
            ChannelEvent::Sample(sample) => self.on_sample(sample),
            ChannelEvent::StreamLiveness(alive) => {
                self.stream_alive = alive;
                self.publish(AppEvent::StreamLiveness(alive));
            }
            ChannelEvent::CommandConnectivity { connected, device } => {
                let current = self.command.as_ref().map(|c| c.device());
                if current != Some(device) {
                    tracing::debug!("Ignoring connectivity of retired client {}", device);
                    return;
                }
                tracing::info!(
                    "Command channel {} {}",
                    device,
                    if connected { "connected" } else { "disconnected" }
                );
                self.publish(AppEvent::Connectivity { connected, device });
            }
            ChannelEvent::CommandResponse(line) => self.publish(AppEvent::CommandResponse(line)),
            ChannelEvent::HeartbeatSent => tracing::trace!("Heartbeat sent"),
            ChannelEvent::ParseError { channel, message } => {
                self.publish(AppEvent::ParseError { channel, message })
            }
        }
    }

    fn on_sample(&mut self, sample: SpectralSample) {
        if sample.stream_count > 0 {
            if let Some(device) = self.device.as_mut() {
                device.observe_stream_count(sample.stream_count);
            }
        }
        self.recorder.record(&sample);
        self.cache.push(sample.clone());
        self.publish(AppEvent::TelemetrySample(sample));
    }

    fn on_device_announced(&mut self, report: DeviceReport, peer: SocketAddr) {
        let ip = match report.address() {
            Some(ip) => ip,
            None => {
                tracing::warn!("Device at {} announced without a valid IPv4 address", peer);
                return;
            }
        };

        let same_device = self.device.as_ref().map(|d| d.ip) == Some(ip);
        if !same_device {
            tracing::info!("Device discovered at {}", ip);
            self.device = Some(DeviceSession::new(ip));
        }
        let session = self.device.get_or_insert_with(|| DeviceSession::new(ip));
        session.apply_report(&report);
        let (device, firmware) = (session.device.clone(), session.firmware.clone());
        self.publish(AppEvent::DeviceDiscovered {
            ip,
            device,
            firmware,
        });

        let running = self
            .command
            .as_ref()
            .map(|c| c.device() == ip && c.is_running())
            .unwrap_or(false);
        if running {
            tracing::debug!("Command channel already serving {}", ip);
            return;
        }
        self.connect_command_channel(ip);
    }

    fn connect_command_channel(&mut self, ip: Ipv4Addr) {
        if let Some(mut old) = self.command.take() {
            old.stop();
        }
        let mut client = CommandClient::new(ip, &self.config.network);
        match client.start(self.channel_tx.clone()) {
            Ok(()) => self.command = Some(client),
            Err(e) => {
                tracing::error!("Cannot start command channel: {}", e);
                self.publish(AppEvent::ServiceStatus {
                    channel: crate::network::ChannelKind::Command,
                    ok: false,
                    message: e.to_string(),
                });
            }
        }
    }

    // ---- timers ----

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Measurement { generation, step } => {
                let mut host = RunHost {
                    command: self.command.as_ref(),
                    device: self.device.as_mut(),
                    timers: &mut self.timers,
                };
                let outcome = self
                    .orchestrator
                    .on_step(&mut host, &self.cache, generation, step);
                if let Some(outcome) = outcome {
                    self.on_run_outcome(outcome);
                }
            }
            Timer::SessionTick => self.on_session_tick(),
            Timer::StatusQuery => {
                if self.is_connected() && !self.orchestrator.is_running() {
                    if let Err(e) = self.send(Command::new().get_device_status()) {
                        tracing::debug!("Periodic status query not sent: {}", e);
                    }
                }
                self.timers
                    .schedule_after(self.config.measurement.status_query_interval(), Timer::StatusQuery);
            }
        }
    }

    fn on_session_tick(&mut self) {
        let tick = match self.session.as_mut() {
            Some(session) if session.is_recurring() => session.tick(Instant::now()),
            _ => return,
        };

        match tick {
            SessionTick::Wait => {}
            SessionTick::RunDue => {
                if self.orchestrator.is_running() {
                    tracing::info!("Scheduled run skipped, previous run still active");
                } else if let Err(e) = self.start_run() {
                    tracing::warn!("Scheduled run not started: {}", e);
                }
            }
            SessionTick::Expired => {
                // Let an active run finish into the session first
                if !self.orchestrator.is_running() {
                    tracing::info!("Recurring session reached its duration");
                    self.close_session();
                    return;
                }
            }
        }
        self.timers.schedule_after(SESSION_TICK, Timer::SessionTick);
    }

    // ---- measurement ----

    fn start_run(&mut self) -> Result<u64, MeasurementError> {
        if self.orchestrator.is_running() {
            return Err(MeasurementError::AlreadyRunning);
        }
        if !self.is_connected() {
            return Err(MeasurementError::DeviceOffline);
        }
        if !self.stream_alive {
            tracing::warn!("Telemetry stream is down; the run may time out");
        }

        let paused = self
            .device
            .as_ref()
            .map(|d| d.stream.active && d.stream.paused)
            .unwrap_or(false);
        let mut host = RunHost {
            command: self.command.as_ref(),
            device: self.device.as_mut(),
            timers: &mut self.timers,
        };
        let generation = self.orchestrator.start(&mut host, paused)?;
        self.publish(AppEvent::MeasurementStarted { generation });
        Ok(generation)
    }

    fn on_run_outcome(&mut self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Completed {
                generation,
                records,
                partial,
            } => {
                let phases: Vec<PhaseSummary> = records
                    .iter()
                    .map(|r| PhaseSummary {
                        phase: r.phase,
                        samples: r.samples.len(),
                        means: r.means,
                    })
                    .collect();

                let output_dir = self.config.storage.output_dir.clone();
                let session = self
                    .session
                    .get_or_insert_with(|| MeasurementSession::one_shot(&output_dir));
                let written = session
                    .record_run(records, chrono::Local::now())
                    .map(|run| run.index);
                let run_index = session.run_count();
                if let Err(e) = written {
                    tracing::error!("Failed to write session log: {}", e);
                    self.publish(AppEvent::RequestRejected {
                        request: "session-log",
                        reason: e.to_string(),
                    });
                }

                self.publish(AppEvent::MeasurementCompleted {
                    generation,
                    run_index,
                    partial,
                    phases,
                });
            }
            RunOutcome::Failed {
                generation,
                phase,
                error,
            } => self.publish(AppEvent::MeasurementFailed {
                generation,
                phase,
                error,
            }),
        }
    }

    fn cancel_run(&mut self) {
        let mut host = RunHost {
            command: self.command.as_ref(),
            device: self.device.as_mut(),
            timers: &mut self.timers,
        };
        if let Some(outcome) = self.orchestrator.cancel(&mut host) {
            self.on_run_outcome(outcome);
        }
    }

    fn close_session(&mut self) {
        self.timers.cancel(Timer::SessionTick);
        if let Some(session) = self.session.take() {
            let runs = session.run_count();
            match session.close() {
                Ok(file) => {
                    if let Some(path) = &file {
                        tracing::info!("Session saved to {}", path.display());
                    }
                    self.publish(AppEvent::SessionClosed { runs, file });
                }
                Err(e) => {
                    tracing::error!("Failed to close session log: {}", e);
                    self.publish(AppEvent::SessionClosed { runs, file: None });
                }
            }
        }
    }

    // ---- requests ----

    /// Handle one request; `false` means shut down
    pub fn handle_request(&mut self, request: ControlRequest) -> bool {
        let name = request.name();
        tracing::debug!("Request: {:?}", request);

        let result: Result<(), String> = match request {
            ControlRequest::SendRaw(text) => self.send_raw(&text),
            ControlRequest::SetLed(on) => self.send_checked(Ok(Command::new().led(on))),
            ControlRequest::SetLedBrightness(level) => {
                self.send_checked(Command::new().led_brightness(level))
            }
            ControlRequest::SetUv(on) => self.send_checked(Ok(Command::new().uv_led(on))),
            ControlRequest::SetUvBrightness(level) => {
                self.send_checked(Command::new().uv_brightness(level))
            }
            ControlRequest::SetBuzzer(on) => self.send_checked(Ok(Command::new().buzzer(on))),
            ControlRequest::ToggleDataStream => self.toggle_data_stream(),
            ControlRequest::SetStreamMode(mode) => self.set_stream_mode(mode),
            ControlRequest::SetStreamCount(count) => self.set_stream_count(count),
            ControlRequest::TogglePause => self.toggle_pause(),
            ControlRequest::ResetStreamCount => self.reset_stream_count(),
            ControlRequest::SetStreamInterval(ms) => {
                self.send_checked(Command::new().stream_interval(ms))
            }
            ControlRequest::GetDeviceStatus => {
                self.send_checked(Ok(Command::new().get_device_status()))
            }
            ControlRequest::Reboot => self.send_checked(Ok(Command::new().reboot())),
            ControlRequest::StartRecording => {
                self.recorder.start();
                tracing::info!("Recording started");
                Ok(())
            }
            ControlRequest::StopRecording => {
                if self.recorder.is_recording() {
                    self.stop_recording(RecordingStop::Requested);
                    Ok(())
                } else {
                    Err("not recording".into())
                }
            }
            ControlRequest::SaveRecording(path) => self.save_recording(path),
            ControlRequest::ClearCache => {
                self.cache.clear();
                Ok(())
            }
            ControlRequest::ClearRecording => {
                if self.recorder.clear() {
                    self.last_recording.clear();
                    Ok(())
                } else {
                    Err("recording in progress".into())
                }
            }
            ControlRequest::StartInstantMeasurement => {
                self.start_run().map(|_| ()).map_err(|e| e.to_string())
            }
            ControlRequest::StartRecurringSession {
                interval_min,
                duration_min,
            } => RecurringSchedule::from_minutes(interval_min, duration_min)
                .and_then(|schedule| self.start_recurring(schedule))
                .map_err(|e| e.to_string()),
            ControlRequest::StopRecurringSession => {
                if self.has_recurring_session() {
                    self.cancel_run();
                    self.close_session();
                    Ok(())
                } else {
                    Err(MeasurementError::NoSession.to_string())
                }
            }
            ControlRequest::CancelMeasurement => {
                if self.orchestrator.is_running() {
                    self.cancel_run();
                    Ok(())
                } else {
                    Err("no run in progress".into())
                }
            }
            ControlRequest::SetLocalAddress(ip) => self.set_local_address(ip),
            ControlRequest::Stats => {
                let stats = self.stats();
                self.publish(AppEvent::Stats(stats));
                Ok(())
            }
            ControlRequest::Shutdown => return false,
        };

        if let Err(reason) = result {
            self.reject(name, reason);
        }
        true
    }

    fn send_checked(&mut self, cmd: Result<Command, CommandError>) -> Result<(), String> {
        let cmd = cmd.map_err(|e| e.to_string())?;
        self.send(cmd).map_err(|e| e.to_string())
    }

    fn send_raw(&mut self, text: &str) -> Result<(), String> {
        let map: Map<String, Value> =
            serde_json::from_str(text).map_err(|e| format!("not a JSON object: {}", e))?;
        self.send(Command::from_map(map)).map_err(|e| e.to_string())
    }

    /// Last known stream state; requires an announced device
    fn stream_state(&self) -> Result<StreamState, String> {
        self.device
            .as_ref()
            .map(|d| d.stream.clone())
            .ok_or_else(|| CommandError::NotConnected.to_string())
    }

    fn toggle_data_stream(&mut self) -> Result<(), String> {
        let stream = self.stream_state()?;
        let cmd = if stream.active {
            Command::new().data_stream(false)
        } else {
            // The device starts paused; the operator resumes explicitly
            let cmd = Command::new()
                .data_stream(true)
                .stream_pause(true)
                .stream_mode(stream.mode)
                .stream_interval(stream.interval_ms)
                .map_err(|e| e.to_string())?;
            match stream.mode {
                StreamMode::Fixed => cmd.stream_count(stream.target_count),
                StreamMode::Continuous => cmd,
            }
        };
        self.send(cmd).map_err(|e| e.to_string())
    }

    fn set_stream_mode(&mut self, mode: StreamMode) -> Result<(), String> {
        let stream = self.stream_state()?;
        let cmd = match mode {
            StreamMode::Fixed => Command::new()
                .stream_mode(mode)
                .stream_count(stream.target_count),
            StreamMode::Continuous => Command::new().stream_mode(mode),
        };
        self.send(cmd).map_err(|e| e.to_string())
    }

    fn set_stream_count(&mut self, count: u32) -> Result<(), String> {
        if self.stream_state()?.mode != StreamMode::Fixed {
            return Err(CommandError::RequiresFixedMode.to_string());
        }
        self.send(Command::new().stream_count(count).stream_reset())
            .map_err(|e| e.to_string())
    }

    fn toggle_pause(&mut self) -> Result<(), String> {
        let stream = self.stream_state()?;
        if !stream.active {
            return Err(CommandError::StreamInactive.to_string());
        }
        self.send(Command::new().stream_pause(!stream.paused))
            .map_err(|e| e.to_string())
    }

    fn reset_stream_count(&mut self) -> Result<(), String> {
        if self.stream_state()?.mode != StreamMode::Fixed {
            return Err(CommandError::RequiresFixedMode.to_string());
        }
        self.send(Command::new().stream_reset()).map_err(|e| e.to_string())
    }

    fn stop_recording(&mut self, reason: RecordingStop) {
        let (samples, count) = self.recorder.stop();
        tracing::info!("Recording stopped with {} samples ({:?})", count, reason);
        self.last_recording = samples;
        self.publish(AppEvent::RecordingStopped {
            samples: count,
            reason,
        });
    }

    fn save_recording(&mut self, path: Option<PathBuf>) -> Result<(), String> {
        let samples: &[SpectralSample] = if self.recorder.is_recording() {
            self.recorder.samples()
        } else {
            &self.last_recording
        };
        let path = path.unwrap_or_else(|| {
            self.config
                .storage
                .output_dir
                .join(export::default_file_name())
        });
        let saved = save_samples(&path, samples).map_err(|e| e.to_string())?;
        self.publish(AppEvent::RecordingSaved(saved));
        Ok(())
    }

    fn has_recurring_session(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.is_recurring())
            .unwrap_or(false)
    }

    fn start_recurring(&mut self, schedule: RecurringSchedule) -> Result<(), MeasurementError> {
        if self.has_recurring_session() {
            return Err(MeasurementError::SessionActive);
        }
        if !self.is_connected() {
            return Err(MeasurementError::DeviceOffline);
        }
        // A one-shot session in progress is closed so its file stands alone
        self.close_session();

        tracing::info!(
            "Recurring session: every {:?} for {:?}",
            schedule.interval,
            schedule.duration
        );
        self.session = Some(MeasurementSession::recurring(
            &self.config.storage.output_dir,
            schedule,
            Instant::now(),
        ));
        self.publish(AppEvent::SessionStarted { recurring: true });
        self.timers.schedule_after(Duration::ZERO, Timer::SessionTick);
        Ok(())
    }

    fn set_local_address(&mut self, ip: IpAddr) -> Result<(), String> {
        if !ip.is_ipv4() {
            return Err(NetworkError::InvalidAddress(ip.to_string()).to_string());
        }

        tracing::info!("Rebinding network services to {}", ip);
        self.cancel_run();
        self.stop_channels();
        self.device = None;
        self.stream_alive = false;

        self.local_ip = ip;
        self.status = StatusServer::new(
            SocketAddr::new(ip, self.config.network.status_port),
            &self.config.network,
        );
        self.telemetry = TelemetryReceiver::new(
            SocketAddr::new(ip, self.config.network.telemetry_port),
            &self.config.network,
        );
        self.config.network.bind_address = ip;
        let status = self.status.start(self.channel_tx.clone());
        let telemetry = self.telemetry.start(self.channel_tx.clone());
        status.and(telemetry).map(|_| ()).map_err(|e| e.to_string())
    }

    fn stop_channels(&mut self) {
        if let Some(mut client) = self.command.take() {
            client.stop();
        }
        self.status.stop();
        self.telemetry.stop();
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            cache_len: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            evicted: self.cache.evicted_count(),
            recording: self.recorder.is_recording(),
            recording_len: self.recorder.len(),
            completed_runs: self.orchestrator.completed_runs(),
            session_runs: self.session.as_ref().map(|s| s.run_count()).unwrap_or(0),
            stream_alive: self.stream_alive,
            command_state: self.command.as_ref().map(|c| c.state()),
            packets_received: 0,
            invalid_packets: 0,
        }
        .with_receiver(&self.telemetry.stats())
    }

    pub fn device(&self) -> Option<&DeviceSession> {
        self.device.as_ref()
    }

    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Cancel any run, flush the session and stop every channel
    pub fn shutdown(&mut self) {
        tracing::info!("Controller shutting down");
        self.cancel_run();
        self.close_session();
        if self.recorder.is_recording() {
            self.stop_recording(RecordingStop::Requested);
        }
        self.stop_channels();
    }
}
