//! Measurement sessions, recurring schedules and the session log
//!
//! A session groups the runs made between its start and close. Each
//! completed run is appended to the session's CSV file as soon as it
//! finishes, so a crash loses at most the run in progress.

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::constants::CHANNEL_NAMES;
use crate::error::{MeasurementError, StorageError};
use crate::measurement::phase::MeasurementRecord;

/// Fixed-interval schedule for recurring sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurringSchedule {
    pub interval: Duration,
    pub duration: Duration,
}

impl RecurringSchedule {
    pub fn new(interval: Duration, duration: Duration) -> Result<Self, MeasurementError> {
        if interval.is_zero() {
            return Err(MeasurementError::InvalidSchedule(
                "interval must be non-zero".into(),
            ));
        }
        if duration.is_zero() {
            return Err(MeasurementError::InvalidSchedule(
                "duration must be non-zero".into(),
            ));
        }
        Ok(Self { interval, duration })
    }

    /// Schedule from whole minutes, as entered by an operator
    pub fn from_minutes(interval: u64, duration: u64) -> Result<Self, MeasurementError> {
        Self::new(
            Duration::from_secs(interval.saturating_mul(60)),
            Duration::from_secs(duration.saturating_mul(60)),
        )
    }
}

/// What a supervisor tick asks the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTick {
    /// Nothing due
    Wait,
    /// A scheduled run is due now
    RunDue,
    /// Total duration reached; close the session
    Expired,
}

/// One completed run: its three phase records
#[derive(Debug, Clone)]
pub struct CompletedRun {
    /// 1-based within the session
    pub index: u64,
    pub completed_at: DateTime<Local>,
    pub records: Vec<MeasurementRecord>,
}

/// A group of measurement runs, one-shot or recurring
#[derive(Debug)]
pub struct MeasurementSession {
    started_at: DateTime<Local>,
    started: Instant,
    schedule: Option<RecurringSchedule>,
    next_run: Option<Instant>,
    runs: Vec<CompletedRun>,
    log: SessionLog,
}

impl MeasurementSession {
    /// Session that only runs on demand
    pub fn one_shot(output_dir: &Path) -> Self {
        Self::create(output_dir, None, Instant::now())
    }

    /// Recurring session; the first run is due immediately
    pub fn recurring(output_dir: &Path, schedule: RecurringSchedule, now: Instant) -> Self {
        Self::create(output_dir, Some(schedule), now)
    }

    fn create(output_dir: &Path, schedule: Option<RecurringSchedule>, now: Instant) -> Self {
        let started_at = Local::now();
        let log = SessionLog::new(output_dir.join(SessionLog::file_name(&started_at)));
        Self {
            started_at,
            started: now,
            next_run: schedule.map(|_| now),
            schedule,
            runs: Vec::new(),
            log,
        }
    }

    /// Supervisor tick, normally once per second
    pub fn tick(&mut self, now: Instant) -> SessionTick {
        let schedule = match self.schedule {
            Some(schedule) => schedule,
            None => return SessionTick::Wait,
        };

        if now.saturating_duration_since(self.started) >= schedule.duration {
            return SessionTick::Expired;
        }

        match self.next_run {
            Some(due) if now >= due => {
                self.next_run = Some(now + schedule.interval);
                SessionTick::RunDue
            }
            _ => SessionTick::Wait,
        }
    }

    /// Append a completed run and write it to the log
    ///
    /// Phase records short of their target count are kept in memory but
    /// not written.
    pub fn record_run(
        &mut self,
        records: Vec<MeasurementRecord>,
        completed_at: DateTime<Local>,
    ) -> Result<&CompletedRun, StorageError> {
        let index = self.runs.len() as u64 + 1;
        let run = CompletedRun {
            index,
            completed_at,
            records,
        };

        let result = self.log.append(&run);
        self.runs.push(run);
        result?;

        let run = &self.runs[self.runs.len() - 1];
        Ok(run)
    }

    /// Flush the log; returns its path if anything was written
    pub fn close(mut self) -> Result<Option<PathBuf>, StorageError> {
        tracing::info!(
            "[Measurement] session started {} closed after {} runs",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.runs.len()
        );
        self.log.finish()
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn schedule(&self) -> Option<RecurringSchedule> {
        self.schedule
    }

    pub fn runs(&self) -> &[CompletedRun] {
        &self.runs
    }

    pub fn run_count(&self) -> u64 {
        self.runs.len() as u64
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }
}

/// Append-only CSV log of one session
///
/// Columns: measurement_index, measurement_time, measurement_type,
/// data_index, F1..F8. The file is created on the first write.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    rows: u64,
}

impl SessionLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            rows: 0,
        }
    }

    /// `measurement_session_<YYYYmmdd_HHMMSS>.csv`
    pub fn file_name(started_at: &DateTime<Local>) -> String {
        format!(
            "measurement_session_{}.csv",
            started_at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn header() -> Vec<&'static str> {
        let mut header = vec![
            "measurement_index",
            "measurement_time",
            "measurement_type",
            "data_index",
        ];
        header.extend_from_slice(&CHANNEL_NAMES);
        header
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, StorageError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let needs_header = file.metadata()?.len() == 0;
            let mut writer = csv::Writer::from_writer(file);
            if needs_header {
                writer.write_record(Self::header())?;
            }
            tracing::info!("[Measurement] session log {}", self.path.display());
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("session log unavailable")))
    }

    /// Write every complete phase record of `run` and flush
    pub fn append(&mut self, run: &CompletedRun) -> Result<usize, StorageError> {
        let time = run.completed_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let writer = self.writer()?;
        let mut written = 0;

        for record in run.records.iter().filter(|r| r.is_complete()) {
            for (data_index, sample) in record.samples.iter().enumerate() {
                let mut row = Vec::with_capacity(4 + sample.channels.len());
                row.push(run.index.to_string());
                row.push(time.clone());
                row.push(record.phase.label().to_string());
                row.push(data_index.to_string());
                row.extend(sample.channels.iter().map(|v| v.to_string()));
                writer.write_record(&row)?;
                written += 1;
            }
        }
        writer.flush()?;

        self.rows += written as u64;
        tracing::debug!("[Measurement] run {} wrote {} rows", run.index, written);
        Ok(written)
    }

    /// Flush and close; the path is returned only if rows were written
    pub fn finish(&mut self) -> Result<Option<PathBuf>, StorageError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok((self.rows > 0).then(|| self.path.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHANNEL_COUNT;
    use crate::data::SpectralSample;
    use crate::measurement::phase::{MeasurementPhase, PhaseBuffer};

    fn record(phase: MeasurementPhase, n: usize, target: usize) -> MeasurementRecord {
        let mut buffer = PhaseBuffer::new(phase, target);
        for i in 0..n {
            buffer.push(SpectralSample::new(
                i as u64,
                i as u64,
                0,
                [i as f64; CHANNEL_COUNT],
                None,
            ));
        }
        buffer.into_record(Local::now())
    }

    #[test]
    fn test_schedule_rejects_zero() {
        assert!(RecurringSchedule::from_minutes(0, 30).is_err());
        assert!(RecurringSchedule::from_minutes(5, 0).is_err());
        let schedule = RecurringSchedule::from_minutes(5, 30).unwrap();
        assert_eq!(schedule.interval, Duration::from_secs(300));
    }

    #[test]
    fn test_recurring_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Instant::now();
        let schedule = RecurringSchedule::new(Duration::from_secs(10), Duration::from_secs(25)).unwrap();
        let mut session = MeasurementSession::recurring(dir.path(), schedule, t0);

        assert_eq!(session.tick(t0), SessionTick::RunDue);
        assert_eq!(session.tick(t0 + Duration::from_secs(1)), SessionTick::Wait);
        assert_eq!(session.tick(t0 + Duration::from_secs(10)), SessionTick::RunDue);
        assert_eq!(session.tick(t0 + Duration::from_secs(19)), SessionTick::Wait);
        assert_eq!(session.tick(t0 + Duration::from_secs(20)), SessionTick::RunDue);
        assert_eq!(session.tick(t0 + Duration::from_secs(25)), SessionTick::Expired);
    }

    #[test]
    fn test_one_shot_never_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = MeasurementSession::one_shot(dir.path());
        assert_eq!(session.tick(Instant::now() + Duration::from_secs(3600)), SessionTick::Wait);
        assert!(!session.is_recurring());
    }

    #[test]
    fn test_log_appends_complete_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = MeasurementSession::one_shot(dir.path());
        let path = session.log_path().to_path_buf();

        let records = vec![
            record(MeasurementPhase::LedOnly, 2, 2),
            record(MeasurementPhase::UvOnly, 1, 2),
            record(MeasurementPhase::LedUv, 2, 2),
        ];
        let run = session.record_run(records, Local::now()).unwrap();
        assert_eq!(run.index, 1);

        session
            .record_run(vec![record(MeasurementPhase::LedOnly, 2, 2)], Local::now())
            .unwrap();
        assert_eq!(session.run_count(), 2);

        let written = session.close().unwrap();
        assert_eq!(written, Some(path.clone()));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), SessionLog::header());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(&rows[0][0], "1");
        assert_eq!(&rows[0][2], "LED Only");
        assert_eq!(&rows[1][3], "1");
        assert_eq!(&rows[2][2], "LED+UV");
        assert_eq!(&rows[4][0], "2");
    }

    #[test]
    fn test_empty_session_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = MeasurementSession::one_shot(dir.path());
        let path = session.log_path().to_path_buf();
        assert_eq!(session.close().unwrap(), None);
        assert!(!path.exists());
    }
}
