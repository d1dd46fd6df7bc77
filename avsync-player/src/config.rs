//! Engine tunables
//!
//! Read from the `[player]` table of the TOML config file. Every field has a
//! default, so an empty or missing table yields [`PlayerConfig::default`].

use avsync_common::config::TomlConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Playback engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Audio sink queue ceiling; feeding pauses while the sink holds more
    #[serde(default = "default_audio_queue_limit_bytes")]
    pub audio_queue_limit_bytes: u64,

    /// Apply the audio queue ceiling at all
    #[serde(default = "default_true")]
    pub limit_audio_queue_depth: bool,

    /// Video frames later than this are dropped (microseconds)
    #[serde(default = "default_late_frame_threshold_us")]
    pub late_frame_threshold_us: i64,

    /// Sleep between work loop iterations (milliseconds)
    #[serde(default = "default_work_interval_ms")]
    pub work_interval_ms: u64,

    /// Minimum spacing between hardware timestamp samples (microseconds)
    #[serde(default = "default_timestamp_sample_interval_us")]
    pub timestamp_sample_interval_us: i64,

    /// Display refresh interval reported while the release adjuster is enabled
    #[serde(default = "default_vsync_interval_ns")]
    pub default_vsync_interval_ns: i64,

    /// Upper bound on how long reset waits for the worker to exit
    #[serde(default = "default_worker_stop_timeout_ms")]
    pub worker_stop_timeout_ms: u64,

    /// Event broadcast channel capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_audio_queue_limit_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_late_frame_threshold_us() -> i64 {
    30_000
}

fn default_work_interval_ms() -> u64 {
    5
}

fn default_timestamp_sample_interval_us() -> i64 {
    250_000
}

fn default_vsync_interval_ns() -> i64 {
    16_666_667
}

fn default_worker_stop_timeout_ms() -> u64 {
    1_000
}

fn default_event_bus_capacity() -> usize {
    256
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_queue_limit_bytes: default_audio_queue_limit_bytes(),
            limit_audio_queue_depth: default_true(),
            late_frame_threshold_us: default_late_frame_threshold_us(),
            work_interval_ms: default_work_interval_ms(),
            timestamp_sample_interval_us: default_timestamp_sample_interval_us(),
            default_vsync_interval_ns: default_vsync_interval_ns(),
            worker_stop_timeout_ms: default_worker_stop_timeout_ms(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl PlayerConfig {
    /// Build from a loaded config document and validate.
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let player: PlayerConfig = config.player_section()?;
        player.validate()?;
        Ok(player)
    }

    /// Reject values that would stall or spin the engine.
    pub fn validate(&self) -> Result<()> {
        if self.audio_queue_limit_bytes == 0 {
            return Err(invalid("audio_queue_limit_bytes must be greater than 0"));
        }
        if self.late_frame_threshold_us <= 0 {
            return Err(invalid("late_frame_threshold_us must be greater than 0"));
        }
        if self.work_interval_ms == 0 {
            return Err(invalid("work_interval_ms must be greater than 0"));
        }
        if self.timestamp_sample_interval_us <= 0 {
            return Err(invalid("timestamp_sample_interval_us must be greater than 0"));
        }
        if self.default_vsync_interval_ns <= 0 {
            return Err(invalid("default_vsync_interval_ns must be greater than 0"));
        }
        if self.worker_stop_timeout_ms == 0 {
            return Err(invalid("worker_stop_timeout_ms must be greater than 0"));
        }
        if self.event_bus_capacity == 0 {
            return Err(invalid("event_bus_capacity must be greater than 0"));
        }
        Ok(())
    }

    /// Render as a `[player]` TOML table, as it would appear in a config file.
    pub fn to_toml_string(&self) -> Result<String> {
        let mut document = toml::Table::new();
        let player = toml::Table::try_from(self)
            .map_err(|e| invalid(&format!("cannot serialize [player]: {}", e)))?;
        document.insert("player".to_string(), toml::Value::Table(player));
        toml::to_string_pretty(&document).map_err(|e| invalid(&e.to_string()))
    }

    pub fn work_interval(&self) -> Duration {
        Duration::from_millis(self.work_interval_ms)
    }

    pub fn worker_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_stop_timeout_ms)
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(avsync_common::Error::Config(message.to_string()))
}
