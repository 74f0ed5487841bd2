//! Configuration for the wellbeing pipeline.

use crate::error::PipelineError;
use crate::events::{Thresholds, DEFAULT_YAWN_MIN_MS};
use crate::window::DEFAULT_WINDOW_SEC;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for one session pipeline plus trend reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Personal threshold calibration
    pub calibration: CalibrationConfig,
    /// Event detection
    pub events: EventConfig,
    /// Length of the aggregation window (seconds)
    pub window_sec: u64,
    /// Interval between history rows handed to persistence (seconds)
    pub log_interval_sec: f64,
    /// Trailing window for trend slopes (minutes)
    pub trend_window_min: u32,
    /// Look-back used when fetching history for trend reports (hours)
    pub history_hours: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration: CalibrationConfig::default(),
            events: EventConfig::default(),
            window_sec: DEFAULT_WINDOW_SEC,
            log_interval_sec: 10.0,
            trend_window_min: 10,
            history_hours: 12,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let cal = &self.calibration;
        if !(cal.fps > 0.0) {
            return Err(PipelineError::ConfigError(format!(
                "calibration.fps must be positive, got {}",
                cal.fps
            )));
        }
        if cal.warmup_sec < 0.0 {
            return Err(PipelineError::ConfigError(format!(
                "calibration.warmup_sec must not be negative, got {}",
                cal.warmup_sec
            )));
        }
        if !(cal.ewma_alpha > 0.0 && cal.ewma_alpha <= 1.0) {
            return Err(PipelineError::ConfigError(format!(
                "calibration.ewma_alpha must be in (0, 1], got {}",
                cal.ewma_alpha
            )));
        }
        if cal.yawn_k < 0.0 {
            return Err(PipelineError::ConfigError(format!(
                "calibration.yawn_k must not be negative, got {}",
                cal.yawn_k
            )));
        }
        if self.events.yawn_min_ms < 0.0 {
            return Err(PipelineError::ConfigError(format!(
                "events.yawn_min_ms must not be negative, got {}",
                self.events.yawn_min_ms
            )));
        }
        let th = &self.events.initial_thresholds;
        if th.open < th.close {
            return Err(PipelineError::ConfigError(format!(
                "events.initial_thresholds.open ({}) is below close ({})",
                th.open, th.close
            )));
        }
        if self.window_sec == 0 {
            return Err(PipelineError::ConfigError(
                "window_sec must be positive".to_string(),
            ));
        }
        if !(self.log_interval_sec > 0.0) {
            return Err(PipelineError::ConfigError(format!(
                "log_interval_sec must be positive, got {}",
                self.log_interval_sec
            )));
        }
        if self.trend_window_min == 0 {
            return Err(PipelineError::ConfigError(
                "trend_window_min must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Warmup length (seconds); buffer capacity is warmup_sec x fps
    pub warmup_sec: f64,
    /// Nominal camera frame rate
    pub fps: f64,
    /// Closure threshold as a fraction of the eye baseline
    pub ear_scale: f64,
    /// Width of the blink hysteresis band
    pub ear_open_delta: f64,
    /// EWMA rate for online eye-baseline adaptation
    pub ewma_alpha: f64,
    /// Yawn threshold in MADs above the mouth median
    pub yawn_k: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            warmup_sec: 10.0,
            fps: 20.0,
            ear_scale: 0.65,
            ear_open_delta: 0.03,
            ewma_alpha: 0.02,
            yawn_k: 3.0,
        }
    }
}

/// Event detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Minimum sustained mouth opening that counts as a yawn (ms)
    pub yawn_min_ms: f64,
    /// Thresholds used until calibration is ready
    pub initial_thresholds: Thresholds,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            yawn_min_ms: DEFAULT_YAWN_MIN_MS,
            initial_thresholds: Thresholds::default(),
        }
    }
}
