//! Core types for the Wellbeing Flux pipeline
//!
//! This module defines the records that flow through each stage of the
//! pipeline: per-frame feature records, event flags, window snapshots, fused
//! features, indices, and the historical rows consumed by trend analysis.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Minimum frame rate for a frame to count as good quality
pub const QUALITY_MIN_FPS: f64 = 20.0;
/// Maximum occlusion for a frame to count as good quality
pub const QUALITY_MAX_OCCLUSION: f64 = 0.2;
/// Minimum lighting score for a frame to count as good quality
pub const QUALITY_MIN_LIGHTING: f64 = 0.4;

/// Default gaze-on-screen ratio when the extractor has no estimate
pub const DEFAULT_GAZE_ON_PCT: f64 = 0.7;
/// Default facial tension when the extractor has no estimate
pub const DEFAULT_FACIAL_TENSION: f64 = 0.5;
/// Default blink-interval variability when the extractor has no estimate
pub const DEFAULT_BLINK_VAR: f64 = 0.2;
/// Default viewing distance (cm) when no inter-pupil measurement exists
pub const DEFAULT_DISTANCE_CM: f64 = 50.0;
/// Eye aspect ratio assumed for frames without a face
pub const DEFAULT_EAR: f64 = 0.3;

/// Capture quality for a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameQuality {
    /// Measured frame rate
    pub fps: f64,
    /// Face occlusion (0 = fully visible, 1 = no face)
    pub occlusion: f64,
    /// Normalized lighting (brightness / 255)
    pub lighting: f64,
}

impl Default for FrameQuality {
    /// A missing quality block never passes the gate.
    fn default() -> Self {
        Self {
            fps: 0.0,
            occlusion: 1.0,
            lighting: 0.0,
        }
    }
}

impl FrameQuality {
    /// Quality gate used by calibration learning and threshold adaptation
    pub fn is_good(&self) -> bool {
        self.fps >= QUALITY_MIN_FPS
            && self.occlusion <= QUALITY_MAX_OCCLUSION
            && self.lighting >= QUALITY_MIN_LIGHTING
    }
}

fn default_gaze_on_pct() -> f64 {
    DEFAULT_GAZE_ON_PCT
}

fn default_facial_tension() -> f64 {
    DEFAULT_FACIAL_TENSION
}

fn default_blink_var() -> f64 {
    DEFAULT_BLINK_VAR
}

fn default_distance_cm() -> f64 {
    DEFAULT_DISTANCE_CM
}

/// Per-frame features produced by the landmark extraction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Eye aspect ratio (averaged over both eyes)
    #[serde(default)]
    pub ear: Option<f64>,
    /// Mouth aspect ratio
    #[serde(default)]
    pub mar: Option<f64>,
    /// Forward-head posture angle normalized to 0-1
    #[serde(default)]
    pub posture_angle_norm: f64,
    /// Fraction of time gaze is on the screen (0-1)
    #[serde(default = "default_gaze_on_pct")]
    pub gaze_on_pct: f64,
    /// 1.0 when the viewer is within near-work distance
    #[serde(default)]
    pub near_work: f64,
    /// Facial tension estimate (0-1)
    #[serde(default = "default_facial_tension")]
    pub facial_tension: f64,
    /// Blink interval variability (0-1)
    #[serde(default = "default_blink_var")]
    pub blink_var: f64,
    /// Estimated viewing distance (cm)
    #[serde(default = "default_distance_cm")]
    pub distance_cm: f64,
    /// Capture quality for this frame
    #[serde(default)]
    pub quality: FrameQuality,
}

impl Default for FeatureRecord {
    fn default() -> Self {
        Self {
            ear: None,
            mar: None,
            posture_angle_norm: 0.0,
            gaze_on_pct: DEFAULT_GAZE_ON_PCT,
            near_work: 0.0,
            facial_tension: DEFAULT_FACIAL_TENSION,
            blink_var: DEFAULT_BLINK_VAR,
            distance_cm: DEFAULT_DISTANCE_CM,
            quality: FrameQuality::default(),
        }
    }
}

impl FeatureRecord {
    /// Record carrying only eye/mouth ratios and the given quality
    pub fn with_ratios(ear: f64, mar: f64, quality: FrameQuality) -> Self {
        Self {
            ear: Some(ear),
            mar: Some(mar),
            quality,
            ..Default::default()
        }
    }

    /// Eye and mouth ratios, or the first one that is missing
    pub fn ratios(&self) -> Result<(f64, f64), PipelineError> {
        let ear = self
            .ear
            .ok_or_else(|| PipelineError::MissingField("ear".to_string()))?;
        let mar = self
            .mar
            .ok_or_else(|| PipelineError::MissingField("mar".to_string()))?;
        Ok((ear, mar))
    }
}

/// Discrete events detected on a single frame (each 0 or 1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub blink: u8,
    pub yawn: u8,
    /// Always 0: nodding detection is not implemented yet
    pub nodding: u8,
}

impl EventFlags {
    /// True if any event fired on this frame
    pub fn any(&self) -> bool {
        self.blink != 0 || self.yawn != 0 || self.nodding != 0
    }
}

/// Aggregates over the samples currently held by a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Fraction of samples with eyes below the canonical closure cutoff
    pub perclos: f64,
    /// Blinks per minute over the actual sample span
    pub blink_rate_min: f64,
    /// Yawns per minute over the actual sample span
    pub yawn_rate_min: f64,
    /// Mean normalized posture angle
    pub posture_angle_norm: f64,
    /// Population variance of the head-pose proxy
    pub headpose_var: f64,
    /// Mean gaze-on-screen ratio
    pub gaze_on_pct: f64,
    /// Mean near-work flag (fraction of near-work time)
    pub near_work: f64,
    /// Number of samples the snapshot was computed from
    pub sample_count: usize,
}

/// Feature vector fed into index fusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedFeatures {
    pub perclos: f64,
    pub yawn_rate_min: f64,
    pub posture_angle_norm: f64,
    pub headpose_var: f64,
    pub gaze_on_pct: f64,
    pub near_work: f64,
    pub facial_tension: f64,
    pub blink_var: f64,
}

impl Default for FusedFeatures {
    fn default() -> Self {
        Self {
            perclos: 0.0,
            yawn_rate_min: 0.0,
            posture_angle_norm: 0.0,
            headpose_var: 0.0,
            gaze_on_pct: DEFAULT_GAZE_ON_PCT,
            near_work: 0.0,
            facial_tension: DEFAULT_FACIAL_TENSION,
            blink_var: DEFAULT_BLINK_VAR,
        }
    }
}

impl FusedFeatures {
    /// Combine window aggregates with the instantaneous extras of the current frame.
    ///
    /// Window values win where present; without a snapshot the frame's own values
    /// (or neutral defaults) are used.
    pub fn fuse(snapshot: Option<&WindowSnapshot>, record: &FeatureRecord) -> Self {
        match snapshot {
            Some(snap) => Self {
                perclos: snap.perclos,
                yawn_rate_min: snap.yawn_rate_min,
                posture_angle_norm: snap.posture_angle_norm,
                headpose_var: snap.headpose_var,
                gaze_on_pct: snap.gaze_on_pct,
                near_work: snap.near_work,
                facial_tension: record.facial_tension,
                blink_var: record.blink_var,
            },
            None => Self::from_frame(record),
        }
    }

    /// Fused features from a single frame, with no window contribution
    pub fn from_frame(record: &FeatureRecord) -> Self {
        Self {
            posture_angle_norm: record.posture_angle_norm,
            gaze_on_pct: record.gaze_on_pct,
            near_work: record.near_work,
            facial_tension: record.facial_tension,
            blink_var: record.blink_var,
            ..Default::default()
        }
    }
}

/// Fused wellbeing indices, each on a 0-100 scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Indices {
    pub fatigue: f64,
    pub stress: f64,
}

/// Current calibration state as seen by downstream consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub ready: bool,
    /// Warmup progress (0-100)
    pub progress: f64,
    pub th_close: f64,
    pub th_open: f64,
    pub th_yawn: f64,
}

/// Historical metric row read back from persistent storage
///
/// `ts` is the ISO-8601 timestamp string written by the store. Any metric may be
/// missing for a given row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub ts: String,
    #[serde(default)]
    pub perclos: Option<f64>,
    #[serde(default)]
    pub yawn_rate: Option<f64>,
    #[serde(default)]
    pub posture_angle: Option<f64>,
    #[serde(default)]
    pub headpose_var: Option<f64>,
    #[serde(default)]
    pub fatigue: Option<f64>,
    #[serde(default)]
    pub stress: Option<f64>,
}

/// Metrics tracked by trend analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    Perclos,
    YawnRate,
    PostureAngle,
    HeadposeVar,
    Fatigue,
    Stress,
}

impl TrendMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendMetric::Perclos => "perclos",
            TrendMetric::YawnRate => "yawn_rate",
            TrendMetric::PostureAngle => "posture_angle",
            TrendMetric::HeadposeVar => "headpose_var",
            TrendMetric::Fatigue => "fatigue",
            TrendMetric::Stress => "stress",
        }
    }

    /// Value of this metric in a history row
    pub fn value(&self, record: &TrendRecord) -> Option<f64> {
        match self {
            TrendMetric::Perclos => record.perclos,
            TrendMetric::YawnRate => record.yawn_rate,
            TrendMetric::PostureAngle => record.posture_angle,
            TrendMetric::HeadposeVar => record.headpose_var,
            TrendMetric::Fatigue => record.fatigue,
            TrendMetric::Stress => record.stress,
        }
    }
}
