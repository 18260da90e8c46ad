//! Application configuration
//!
//! Every section has defaults matching the device protocol, so an absent
//! or partial `config.toml` is always usable.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub cache: CacheConfig,
    pub measurement: MeasurementConfig,
    pub storage: StorageConfig,
}

/// Socket addresses, timeouts and heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address the status and telemetry channels bind to
    pub bind_address: IpAddr,
    pub status_port: u16,
    pub telemetry_port: u16,
    /// Port of the device's command server
    pub command_port: u16,
    pub recv_buffer_size: usize,
    pub connect_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Socket read/accept timeout for the status and telemetry workers
    pub read_timeout_ms: u64,
    /// Read timeout of the command worker's per-iteration poll
    pub command_poll_timeout_ms: u64,
    /// Upper bound on a single blocked command write
    pub command_write_timeout_ms: u64,
    pub liveness_threshold_ms: u64,
    pub liveness_check_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(192, 168, 137, 1)),
            status_port: STATUS_PORT,
            telemetry_port: TELEMETRY_PORT,
            command_port: COMMAND_PORT,
            recv_buffer_size: RECV_BUFFER_SIZE,
            connect_timeout_ms: 10_000,
            reconnect_backoff_ms: 5_000,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            read_timeout_ms: 1_000,
            command_poll_timeout_ms: 500,
            command_write_timeout_ms: 500,
            liveness_threshold_ms: LIVENESS_THRESHOLD_MS,
            liveness_check_interval_ms: 3_000,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.command_poll_timeout_ms)
    }

    pub fn command_write_timeout(&self) -> Duration {
        Duration::from_millis(self.command_write_timeout_ms)
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }
}

/// Live sample cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_DATA_CACHE,
        }
    }
}

/// Measurement run timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Samples collected per illumination phase
    pub samples_per_phase: usize,
    /// Empty polls tolerated before a phase gives up
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Delay before polling for the next sample once one was taken
    pub sample_poll_delay_ms: u64,
    /// Illumination settle time before collection starts
    pub settle_delay_ms: u64,
    pub inter_phase_delay_ms: u64,
    /// Minimum spacing of automatic `getDeviceStatus` queries
    pub status_query_interval_ms: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            samples_per_phase: 5,
            max_retries: 10,
            retry_delay_ms: 500,
            sample_poll_delay_ms: 200,
            settle_delay_ms: 1_000,
            inter_phase_delay_ms: 1_000,
            status_query_interval_ms: 10_000,
        }
    }
}

impl MeasurementConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn sample_poll_delay(&self) -> Duration {
        Duration::from_millis(self.sample_poll_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_phase_delay(&self) -> Duration {
        Duration::from_millis(self.inter_phase_delay_ms)
    }

    pub fn status_query_interval(&self) -> Duration {
        Duration::from_millis(self.status_query_interval_ms)
    }
}

/// Where session logs and exports land
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.toml` from the platform config directory, or defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid configuration: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Platform config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "spectro-link", "spectro-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.network.heartbeat_timeout_ms <= self.network.heartbeat_interval_ms {
            return Err(Error::Config(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.network.heartbeat_timeout_ms, self.network.heartbeat_interval_ms
            )));
        }
        if self.network.recv_buffer_size == 0 {
            return Err(Error::Config("recv_buffer_size must be non-zero".into()));
        }
        // A zero socket timeout is rejected by the OS
        if self.network.command_write_timeout_ms == 0 || self.network.command_poll_timeout_ms == 0 {
            return Err(Error::Config("command socket timeouts must be non-zero".into()));
        }
        if self.cache.capacity == 0 {
            return Err(Error::Config("cache capacity must be non-zero".into()));
        }
        if self.measurement.samples_per_phase == 0 {
            return Err(Error::Config("samples_per_phase must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.status_port, 6677);
        assert_eq!(config.network.telemetry_port, 6699);
        assert_eq!(config.network.command_port, 6688);
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.measurement.samples_per_phase, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [network]
            bind_address = "127.0.0.1"
            heartbeat_interval_ms = 2000
            heartbeat_timeout_ms = 6000

            [measurement]
            samples_per_phase = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.network.bind_address.to_string(), "127.0.0.1");
        assert_eq!(config.network.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(config.network.command_port, 6688);
        assert_eq!(config.measurement.samples_per_phase, 3);
        assert_eq!(config.measurement.max_retries, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let mut config = AppConfig::default();
        config.network.heartbeat_timeout_ms = config.network.heartbeat_interval_ms;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_sizes_and_timeouts() {
        let mut config = AppConfig::default();
        config.network.recv_buffer_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.network.command_write_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\ncapacity = 50\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.cache.capacity, 50);
    }
}
