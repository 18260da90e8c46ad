//! CSV export of raw samples
//!
//! Column order: timestamp, packetCount, streamCount, F1..F8.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::CHANNEL_NAMES;
use crate::data::sample::SpectralSample;
use crate::error::StorageError;

/// Header row of the raw-sample log
pub fn sample_header() -> Vec<&'static str> {
    let mut header = vec!["timestamp", "packetCount", "streamCount"];
    header.extend_from_slice(&CHANNEL_NAMES);
    header
}

/// Serialize samples as CSV into any writer
pub fn write_samples<W: Write>(writer: W, samples: &[SpectralSample]) -> Result<(), StorageError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(sample_header())?;

    for sample in samples {
        let mut row = Vec::with_capacity(3 + sample.channels.len());
        row.push(sample.timestamp.to_string());
        row.push(sample.packet_count.to_string());
        row.push(sample.stream_count.to_string());
        row.extend(sample.channels.iter().map(|v| v.to_string()));
        csv.write_record(&row)?;
    }

    csv.flush()?;
    Ok(())
}

/// Write samples to `path`, creating parent directories
pub fn save_samples(path: &Path, samples: &[SpectralSample]) -> Result<PathBuf, StorageError> {
    if samples.is_empty() {
        return Err(StorageError::Empty);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    write_samples(file, samples)?;
    tracing::info!("Saved {} samples to {}", samples.len(), path.display());
    Ok(path.to_path_buf())
}

/// Timestamped default file name, e.g. `spectral_data_20250101_120000.csv`
pub fn default_file_name() -> String {
    chrono::Local::now()
        .format("spectral_data_%Y%m%d_%H%M%S.csv")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHANNEL_COUNT;

    #[test]
    fn test_column_order() {
        let mut channels = [0.0; CHANNEL_COUNT];
        channels[0] = 12.0;
        channels[7] = 99.5;
        let samples = vec![SpectralSample::new(1000, 7, 3, channels, None)];

        let mut out = Vec::new();
        write_samples(&mut out, &samples).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "timestamp,packetCount,streamCount,F1,F2,F3,F4,F5,F6,F7,F8"
        );
        assert_eq!(lines.next().unwrap(), "1000,7,3,12,0,0,0,0,0,0,99.5");
    }

    #[test]
    fn test_save_refuses_empty() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_samples(&dir.path().join("empty.csv"), &[]);
        assert!(matches!(result, Err(StorageError::Empty)));
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.csv");
        let samples = vec![SpectralSample::new(1, 1, 0, [1.0; CHANNEL_COUNT], None)];

        save_samples(&path, &samples).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
