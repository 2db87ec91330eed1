//! Audio thread tunables and their TOML format.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use cadence_core::defaults;

use crate::error::ConfigError;

/// Tunables for one audio I/O thread.
///
/// Every field has a default, so a config file only needs to name what it
/// changes.
///
/// # TOML Format
///
/// ```toml
/// thread_name = "cadence-audio"
/// playback_wake_fuzz_us = 500
/// max_sleep_secs = 20
/// drop_frames_threshold_ms = 50
/// min_input_wake_ms = 5
/// non_empty_update_interval_secs = 5
/// min_empty_period_secs = 30
/// max_continuous_zero_sleep = 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThreadConfig {
    /// Name given to the OS thread.
    pub thread_name: String,

    /// How early (µs) a playback stream may be fetched before its callback time.
    pub playback_wake_fuzz_us: u64,

    /// Longest single sleep of the thread, in seconds.
    pub max_sleep_secs: u64,

    /// Queued capture latency (ms) above which input frames are dropped.
    pub drop_frames_threshold_ms: u64,

    /// Floor (ms) for the device-level sleep of an input device.
    pub min_input_wake_ms: u64,

    /// Seconds between silence scans on a non-empty output device.
    pub non_empty_update_interval_secs: u64,

    /// Seconds an output device must stay silent to count as empty.
    pub min_empty_period_secs: u64,

    /// Consecutive zero-length sleeps that count as a busy loop.
    pub max_continuous_zero_sleep: u32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            thread_name: "cadence-audio".to_string(),
            playback_wake_fuzz_us: defaults::PLAYBACK_WAKE_FUZZ.as_micros() as u64,
            max_sleep_secs: defaults::MAX_SLEEP.as_secs(),
            drop_frames_threshold_ms: defaults::DROP_FRAMES_THRESHOLD_MS,
            min_input_wake_ms: defaults::MIN_INPUT_WAKE.as_millis() as u64,
            non_empty_update_interval_secs: defaults::NON_EMPTY_UPDATE_INTERVAL.as_secs(),
            min_empty_period_secs: defaults::MIN_EMPTY_PERIOD.as_secs(),
            max_continuous_zero_sleep: defaults::MAX_CONTINUOUS_ZERO_SLEEP_COUNT,
        }
    }
}

impl ThreadConfig {
    /// Set the OS thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the minimum empty period in seconds.
    pub fn with_min_empty_period_secs(mut self, secs: u64) -> Self {
        self.min_empty_period_secs = secs;
        self
    }

    /// Set the drop threshold in milliseconds.
    pub fn with_drop_frames_threshold_ms(mut self, ms: u64) -> Self {
        self.drop_frames_threshold_ms = ms;
        self
    }

    /// Playback wake fuzz as a duration.
    pub fn playback_wake_fuzz(&self) -> Duration {
        Duration::from_micros(self.playback_wake_fuzz_us)
    }

    /// Sleep ceiling as a duration.
    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }

    /// Input device sleep floor as a duration.
    pub fn min_input_wake(&self) -> Duration {
        Duration::from_millis(self.min_input_wake_ms)
    }

    /// Silence scan period as a duration.
    pub fn non_empty_update_interval(&self) -> Duration {
        Duration::from_secs(self.non_empty_update_interval_secs)
    }

    /// Empty hysteresis period as a duration.
    pub fn min_empty_period(&self) -> Duration {
        Duration::from_secs(self.min_empty_period_secs)
    }

    /// Check every tunable; see [`validate_config`](crate::validate_config).
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::validation::validate_config(self)?;
        Ok(())
    }

    /// Load and validate a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Load the config at `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(e) if e.is_not_found() => Ok(Self::default()),
            other => other,
        }
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ThreadConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save the config to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }
}
