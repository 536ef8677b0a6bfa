use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::VigilError;

/// Get the config directory for vigil.
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined.
pub fn get_config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Failed to get config dir"))?;
    path.push("vigil");
    Ok(path)
}

/// Default location of `config.toml`.
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Fractional seconds to a `Duration`, saturating to zero on bad input.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Full service configuration, one table per component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub gaze: GazeConfig,
    pub speech: SpeechConfig,
    pub debounce: DebounceConfig,
    pub sessions: SessionConfig,
    pub reporter: ReporterConfig,
}

/// Frame ingestion and orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Frames held between producers and the consumer before new ones are dropped
    pub queue_capacity: usize,
    /// How long the consumer waits for a frame before re-checking the stop flag
    pub frame_wait_timeout_ms: u64,
    /// Upper bound on waiting for the consumer to exit on stop
    pub join_timeout_ms: u64,
    /// Warm-up window after start during which no violation is raised
    pub startup_grace_period_secs: f64,
    /// Continuous absence that counts as a `no_face` violation
    pub face_absence_threshold_secs: f64,
    /// Minimum spacing of speech checks on the frame path
    pub voice_check_interval_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            frame_wait_timeout_ms: 1000,
            join_timeout_ms: 2000,
            startup_grace_period_secs: 5.0,
            face_absence_threshold_secs: 3.0,
            voice_check_interval_secs: 1.0,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    #[must_use]
    pub fn startup_grace_period(&self) -> Duration {
        secs(self.startup_grace_period_secs)
    }

    #[must_use]
    pub fn face_absence_threshold(&self) -> Duration {
        secs(self.face_absence_threshold_secs)
    }

    #[must_use]
    pub fn voice_check_interval(&self) -> Duration {
        secs(self.voice_check_interval_secs)
    }
}

/// Gaze hysteresis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Consecutive both-eyes-away frames before a violation
    pub consecutive_frames: u32,
    /// Lower bound (exclusive) of the on-screen iris ratio
    pub min_ratio: f32,
    /// Upper bound (exclusive) of the on-screen iris ratio
    pub max_ratio: f32,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            consecutive_frames: 5,
            min_ratio: 0.4,
            max_ratio: 0.6,
        }
    }
}

/// Speech hysteresis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Consecutive human (or non-human) 30ms sub-frames needed to flip state
    pub required_consecutive_frames: u32,
    /// How long a confirmation keeps reporting speech without reconfirming
    pub flicker_window_ms: u64,
    /// RMS threshold of the built-in energy VAD (CLI and tests)
    pub energy_vad_threshold: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            required_consecutive_frames: 5,
            flicker_window_ms: 300,
            energy_vad_threshold: 0.01,
        }
    }
}

impl SpeechConfig {
    #[must_use]
    pub fn flicker_window(&self) -> Duration {
        Duration::from_millis(self.flicker_window_ms)
    }
}

/// Notification cooldown settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Minimum spacing of delivered reports per (exam, student, kind)
    pub cooldown_secs: f64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { cooldown_secs: 5.0 }
    }
}

impl DebounceConfig {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }
}

/// Session registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted
    pub ttl_secs: u64,
    /// Spacing of the background cleanup sweep
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60 * 4,
            cleanup_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Outbound violation reporting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Backend root URL; reports are only logged when unset
    pub base_url: Option<String>,
    pub bearer_token: Option<String>,
    /// Secret for the `X-Vigil-Signature` body signature
    pub signing_secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            bearer_token: None,
            signing_secret: None,
            timeout_secs: 5,
        }
    }
}

impl ReporterConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from `path`, or the default location when `None`.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write this configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem operation fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `VigilError::Config` describing the first invalid field.
    pub fn validate(&self) -> std::result::Result<(), VigilError> {
        let invalid = |msg: &str| Err(VigilError::Config(msg.to_string()));

        if self.monitor.queue_capacity == 0 {
            return invalid("monitor.queue_capacity must be at least 1");
        }
        let durations = [
            ("monitor.startup_grace_period_secs", self.monitor.startup_grace_period_secs),
            ("monitor.face_absence_threshold_secs", self.monitor.face_absence_threshold_secs),
            ("monitor.voice_check_interval_secs", self.monitor.voice_check_interval_secs),
            ("debounce.cooldown_secs", self.debounce.cooldown_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(VigilError::Config(format!("{name} must be a non-negative number")));
            }
        }
        if self.gaze.consecutive_frames == 0 || self.speech.required_consecutive_frames == 0 {
            return invalid("consecutive frame counts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.gaze.min_ratio)
            || !(0.0..=1.0).contains(&self.gaze.max_ratio)
            || self.gaze.min_ratio >= self.gaze.max_ratio
        {
            return invalid("gaze ratios must satisfy 0 <= min_ratio < max_ratio <= 1");
        }
        Ok(())
    }
}
