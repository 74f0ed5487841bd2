//! Personal threshold calibration
//!
//! Learns a user's eye-closure and yawn baselines from a warmup buffer of
//! good-quality frames, then keeps adapting them slowly while operating.
//! Detection thresholds are derived from the baselines on every read and are
//! never stored separately.

use crate::config::CalibrationConfig;
use crate::events::Thresholds;
use crate::types::{CalibrationStatus, FeatureRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Initial eye-aspect-ratio baseline before any calibration
pub const DEFAULT_EAR_MU: f64 = 0.30;
/// Lower clamp for the learned eye baseline
pub const EAR_MU_MIN: f64 = 0.15;
/// Upper clamp for the learned eye baseline
pub const EAR_MU_MAX: f64 = 0.45;
/// Mouth-ratio median used until calibration completes
pub const DEFAULT_MAR_MEDIAN: f64 = 0.20;
/// Mouth-ratio MAD used until calibration completes
pub const DEFAULT_MAR_MAD: f64 = 0.03;
/// Floor on the learned MAD so the yawn threshold never collapses onto the median
pub const MIN_MAR_MAD: f64 = 1e-3;
/// Fraction of the warmup buffer that must be filled before calibration activates
pub const WARMUP_ACTIVATION_RATIO: f64 = 0.6;
/// Mouth samples further than this from the median are not blended in
pub const MAR_ADAPT_GUARD: f64 = 0.2;
/// Blend rate for mouth-median adaptation
pub const MAR_ADAPT_RATE: f64 = 0.1;

/// Adaptive per-session calibrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibrator {
    /// Warmup eye-ratio samples (oldest evicted on overflow)
    ear_values: VecDeque<f64>,
    /// Warmup mouth-ratio samples (oldest evicted on overflow)
    mar_values: VecDeque<f64>,
    /// Buffer capacity: warmup seconds x fps
    warmup_needed: usize,
    /// Set once; never cleared for the lifetime of the calibrator
    ready: bool,
    /// EWMA eye baseline
    ear_mu: f64,
    /// Robust mouth baseline
    mar_median: f64,
    /// Robust mouth spread
    mar_mad: f64,
    ear_scale: f64,
    ear_open_delta: f64,
    ewma_alpha: f64,
    yawn_k: f64,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

impl Calibrator {
    /// Create a calibrator whose warmup buffer holds `warmup_sec * fps` samples
    pub fn new(
        warmup_sec: f64,
        fps: f64,
        ear_scale: f64,
        ear_open_delta: f64,
        ewma_alpha: f64,
        yawn_k: f64,
    ) -> Self {
        let warmup_needed = (warmup_sec * fps).max(0.0) as usize;
        Self {
            ear_values: VecDeque::with_capacity(warmup_needed),
            mar_values: VecDeque::with_capacity(warmup_needed),
            warmup_needed,
            ready: false,
            ear_mu: DEFAULT_EAR_MU,
            mar_median: DEFAULT_MAR_MEDIAN,
            mar_mad: DEFAULT_MAR_MAD,
            ear_scale,
            ear_open_delta,
            ewma_alpha,
            yawn_k,
        }
    }

    /// Create a calibrator from configuration
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(
            config.warmup_sec,
            config.fps,
            config.ear_scale,
            config.ear_open_delta,
            config.ewma_alpha,
            config.yawn_k,
        )
    }

    /// Feed one frame into warmup collection or online adaptation.
    ///
    /// Frames without both `ear` and `mar` are ignored.
    pub fn consume(&mut self, record: &FeatureRecord) {
        let Ok((ear, mar)) = record.ratios() else {
            return;
        };
        let good = record.quality.is_good();

        if !self.ready {
            if good {
                Self::push_bounded(&mut self.ear_values, ear, self.warmup_needed);
                Self::push_bounded(&mut self.mar_values, mar, self.warmup_needed);
            }
            if self.ear_values.len() >= self.required_samples() {
                self.finish_warmup();
            }
            return;
        }

        if good {
            let a = self.ewma_alpha;
            self.ear_mu = (1.0 - a) * self.ear_mu + a * ear;
            if (mar - self.mar_median).abs() < MAR_ADAPT_GUARD {
                self.mar_median =
                    (1.0 - MAR_ADAPT_RATE) * self.mar_median + MAR_ADAPT_RATE * mar;
            }
        }
    }

    fn finish_warmup(&mut self) {
        if let Some(mean) = mean(&self.ear_values) {
            self.ear_mu = mean.clamp(EAR_MU_MIN, EAR_MU_MAX);
        }

        match median(self.mar_values.iter().copied()) {
            Some(med) => {
                let mad = median(self.mar_values.iter().map(|x| (x - med).abs()))
                    .unwrap_or(DEFAULT_MAR_MAD);
                self.mar_median = med;
                self.mar_mad = mad.max(MIN_MAR_MAD);
            }
            None => {
                self.mar_median = DEFAULT_MAR_MEDIAN;
                self.mar_mad = DEFAULT_MAR_MAD;
            }
        }

        self.ready = true;
        tracing::info!(
            samples = self.ear_values.len(),
            ear_mu = self.ear_mu,
            mar_median = self.mar_median,
            mar_mad = self.mar_mad,
            th_close = self.th_close(),
            th_open = self.th_open(),
            th_yawn = self.th_yawn(),
            "calibration ready"
        );
    }

    fn push_bounded(queue: &mut VecDeque<f64>, value: f64, capacity: usize) {
        if capacity == 0 {
            return;
        }
        queue.push_back(value);
        while queue.len() > capacity {
            queue.pop_front();
        }
    }

    /// Number of eye samples needed before calibration activates
    pub fn required_samples(&self) -> usize {
        (self.warmup_needed as f64 * WARMUP_ACTIVATION_RATIO) as usize
    }

    /// Eye-closure threshold
    pub fn th_close(&self) -> f64 {
        self.ear_mu * self.ear_scale
    }

    /// Eye-reopen threshold (upper edge of the hysteresis band)
    pub fn th_open(&self) -> f64 {
        self.th_close() + self.ear_open_delta
    }

    /// Yawn threshold
    pub fn th_yawn(&self) -> f64 {
        self.mar_median + self.yawn_k * self.mar_mad
    }

    /// All three thresholds, in the form the event detector takes
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            close: self.th_close(),
            open: self.th_open(),
            yawn: self.th_yawn(),
        }
    }

    /// Warmup progress in percent
    pub fn progress(&self) -> f64 {
        if self.ready {
            return 100.0;
        }
        let required = self.required_samples();
        if required == 0 {
            return 0.0;
        }
        (self.ear_values.len() as f64 / required as f64 * 100.0).min(100.0)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn ear_mu(&self) -> f64 {
        self.ear_mu
    }

    pub fn mar_median(&self) -> f64 {
        self.mar_median
    }

    pub fn mar_mad(&self) -> f64 {
        self.mar_mad
    }

    /// Capacity of the warmup buffers
    pub fn warmup_needed(&self) -> usize {
        self.warmup_needed
    }

    /// Number of buffered warmup samples
    pub fn sample_count(&self) -> usize {
        self.ear_values.len()
    }

    /// Snapshot of readiness, progress and the derived thresholds
    pub fn status(&self) -> CalibrationStatus {
        CalibrationStatus {
            ready: self.ready,
            progress: self.progress(),
            th_close: self.th_close(),
            th_open: self.th_open(),
            th_yawn: self.th_yawn(),
        }
    }

    /// Load calibrator state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize calibrator state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median with the two middle values averaged for even counts
fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
