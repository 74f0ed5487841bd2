//! Sliding-window aggregation
//!
//! Keeps a time-ordered window of (timestamp, features, events) samples and
//! computes PERCLOS, per-minute event rates, and feature averages on demand.
//! Stale samples are evicted in batches rather than on every update.

use crate::types::{EventFlags, FeatureRecord, WindowSnapshot, DEFAULT_EAR, DEFAULT_GAZE_ON_PCT};
use chrono::Utc;
use std::collections::VecDeque;

/// Canonical eye-closure cutoff for PERCLOS (independent of calibration)
pub const PERCLOS_EAR_THRESHOLD: f64 = 0.21;
/// Minimum time between eviction passes (ms)
pub const CLEANUP_INTERVAL_MS: i64 = 2000;
/// Default window length in seconds
pub const DEFAULT_WINDOW_SEC: u64 = 60;

/// Floor on the rate denominator, in minutes
const MIN_RATE_MINUTES: f64 = 1e-3;

/// One retained frame
#[derive(Debug, Clone)]
pub struct WindowSample {
    pub timestamp_ms: i64,
    pub features: FeatureRecord,
    pub events: EventFlags,
}

/// Bounded time window over recent frames
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    window_ms: i64,
    samples: VecDeque<WindowSample>,
    last_cleanup_ms: i64,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SEC)
    }
}

impl WindowAggregator {
    pub fn new(window_sec: u64) -> Self {
        Self {
            window_ms: window_sec as i64 * 1000,
            samples: VecDeque::new(),
            last_cleanup_ms: 0,
        }
    }

    /// Append a frame stamped with the current wall-clock time
    pub fn update(&mut self, features: FeatureRecord, events: EventFlags) {
        self.update_at(Utc::now().timestamp_millis(), features, events);
    }

    /// Append a frame at `now_ms`. Timestamps must be non-decreasing.
    pub fn update_at(&mut self, now_ms: i64, features: FeatureRecord, events: EventFlags) {
        self.samples.push_back(WindowSample {
            timestamp_ms: now_ms,
            features,
            events,
        });

        if now_ms - self.last_cleanup_ms > CLEANUP_INTERVAL_MS {
            self.cleanup(now_ms);
            self.last_cleanup_ms = now_ms;
        }
    }

    fn cleanup(&mut self, now_ms: i64) {
        let before = self.samples.len();
        while let Some(front) = self.samples.front() {
            if now_ms - front.timestamp_ms > self.window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        let evicted = before - self.samples.len();
        if evicted > 0 {
            tracing::debug!(evicted, retained = self.samples.len(), "window cleanup");
        }
    }

    /// Aggregates over all retained samples, or `None` if the window is empty
    pub fn snapshot(&self) -> Option<WindowSnapshot> {
        if self.samples.is_empty() {
            return None;
        }

        Some(WindowSnapshot {
            perclos: self.perclos(),
            blink_rate_min: self.rate_per_min(|e| e.blink),
            yawn_rate_min: self.rate_per_min(|e| e.yawn),
            posture_angle_norm: self.average(|f| Some(f.posture_angle_norm), 0.0),
            // ear variance stands in for head-pose variance until pose angles are windowed
            headpose_var: self.variance(|f| f.ear, DEFAULT_EAR),
            gaze_on_pct: self.average(|f| Some(f.gaze_on_pct), DEFAULT_GAZE_ON_PCT),
            near_work: self.average(|f| Some(f.near_work), 0.0),
            sample_count: self.samples.len(),
        })
    }

    fn perclos(&self) -> f64 {
        let closed = self
            .samples
            .iter()
            .filter(|s| s.features.ear.unwrap_or(DEFAULT_EAR) < PERCLOS_EAR_THRESHOLD)
            .count();
        closed as f64 / self.samples.len() as f64
    }

    fn rate_per_min(&self, flag: impl Fn(&EventFlags) -> u8) -> f64 {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        let count: u32 = self.samples.iter().map(|s| flag(&s.events) as u32).sum();
        let duration_ms = (last.timestamp_ms - first.timestamp_ms + 1) as f64;
        let minutes = (duration_ms / 60_000.0).max(MIN_RATE_MINUTES);
        count as f64 / minutes
    }

    /// Mean of a feature, substituting `default` where the feature is missing
    pub fn average(&self, field: impl Fn(&FeatureRecord) -> Option<f64>, default: f64) -> f64 {
        if self.samples.is_empty() {
            return default;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|s| field(&s.features).unwrap_or(default))
            .sum();
        sum / self.samples.len() as f64
    }

    /// Population variance of a feature; 0 with fewer than two samples
    pub fn variance(&self, field: impl Fn(&FeatureRecord) -> Option<f64>, default: f64) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let values: Vec<f64> = self
            .samples
            .iter()
            .map(|s| field(&s.features).unwrap_or(default))
            .collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Timestamps of the oldest and newest retained samples
    pub fn span_ms(&self) -> Option<(i64, i64)> {
        Some((self.samples.front()?.timestamp_ms, self.samples.back()?.timestamp_ms))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_cleanup_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ear(ear: f64) -> FeatureRecord {
        FeatureRecord {
            ear: Some(ear),
            mar: Some(0.2),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let agg = WindowAggregator::new(60);
        assert!(agg.snapshot().is_none());
    }

    #[test]
    fn test_perclos_all_closed() {
        let mut agg = WindowAggregator::new(60);
        for i in 0..60 {
            agg.update_at(i * 1000, with_ear(0.15), EventFlags::default());
        }
        let snap = agg.snapshot().unwrap();
        assert_eq!(snap.perclos, 1.0);
        assert_eq!(snap.sample_count, 60);
    }

    #[test]
    fn test_perclos_fraction() {
        let mut agg = WindowAggregator::new(60);
        for i in 0..10 {
            let ear = if i < 3 { 0.1 } else { 0.3 };
            agg.update_at(i * 100, with_ear(ear), EventFlags::default());
        }
        assert!((agg.snapshot().unwrap().perclos - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_event_rate_uses_actual_span() {
        let mut agg = WindowAggregator::new(60);
        // 30 seconds of samples with 3 blinks
        for i in 0..=30 {
            let events = EventFlags {
                blink: u8::from(i % 10 == 5),
                ..Default::default()
            };
            agg.update_at(i * 1000, with_ear(0.3), events);
        }
        let snap = agg.snapshot().unwrap();
        let minutes = 30_001.0 / 60_000.0;
        assert!((snap.blink_rate_min - 3.0 / minutes).abs() < 1e-9);
        assert_eq!(snap.yawn_rate_min, 0.0);
    }

    #[test]
    fn test_single_sample_rate_is_finite() {
        let mut agg = WindowAggregator::new(60);
        let events = EventFlags {
            yawn: 1,
            ..Default::default()
        };
        agg.update_at(5_000, with_ear(0.3), events);
        let snap = agg.snapshot().unwrap();
        assert!(snap.yawn_rate_min.is_finite());
        // 1 ms span is below the 1e-3 minute floor
        assert!((snap.yawn_rate_min - 1000.0).abs() < 1e-9);
        assert_eq!(snap.headpose_var, 0.0);
    }

    #[test]
    fn test_eviction_converges_to_window() {
        let fps = 10;
        let window_sec = 5;
        let mut agg = WindowAggregator::new(window_sec);
        // 2x window at steady rate
        for i in 0..(2 * window_sec as i64 * fps) {
            agg.update_at(i * 1000 / fps, with_ear(0.3), EventFlags::default());
        }
        let (oldest, newest) = agg.span_ms().unwrap();
        // batched cleanup may keep up to one cleanup interval of extra samples
        assert!(newest - oldest <= agg.window_ms() + CLEANUP_INTERVAL_MS);
        let expected = window_sec as usize * fps as usize;
        let tolerance = (CLEANUP_INTERVAL_MS as usize / 1000 + 1) * fps as usize;
        assert!(agg.len() >= expected);
        assert!(agg.len() <= expected + tolerance);
    }

    #[test]
    fn test_cleanup_drops_only_stale_samples() {
        let mut agg = WindowAggregator::new(10);
        agg.update_at(0, with_ear(0.1), EventFlags::default());
        agg.update_at(5_000, with_ear(0.3), EventFlags::default());
        agg.update_at(12_000, with_ear(0.3), EventFlags::default());
        // sample at 0 is 12 s old, sample at 5 s is 7 s old
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.snapshot().unwrap().perclos, 0.0);
    }

    #[test]
    fn test_cleanup_is_batched() {
        let mut agg = WindowAggregator::new(1);
        agg.update_at(2_500, with_ear(0.3), EventFlags::default()); // cleanup at 2500
        agg.update_at(3_000, with_ear(0.3), EventFlags::default());
        agg.update_at(4_000, with_ear(0.3), EventFlags::default());
        // 1.5 s since the last cleanup: the stale first sample is still held
        assert_eq!(agg.len(), 3);
        agg.update_at(4_600, with_ear(0.3), EventFlags::default());
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_averages_and_variance() {
        let mut agg = WindowAggregator::new(60);
        for (i, (posture, ear)) in [(0.2, 0.2), (0.4, 0.4)].iter().enumerate() {
            let record = FeatureRecord {
                ear: Some(*ear),
                posture_angle_norm: *posture,
                gaze_on_pct: 0.5,
                near_work: i as f64,
                ..Default::default()
            };
            agg.update_at(i as i64 * 100, record, EventFlags::default());
        }
        let snap = agg.snapshot().unwrap();
        assert!((snap.posture_angle_norm - 0.3).abs() < 1e-12);
        assert!((snap.gaze_on_pct - 0.5).abs() < 1e-12);
        assert!((snap.near_work - 0.5).abs() < 1e-12);
        // population variance of [0.2, 0.4] = 0.01
        assert!((snap.headpose_var - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_missing_ear_uses_default() {
        let mut agg = WindowAggregator::new(60);
        agg.update_at(0, FeatureRecord::default(), EventFlags::default());
        agg.update_at(10, FeatureRecord::default(), EventFlags::default());
        let snap = agg.snapshot().unwrap();
        assert_eq!(snap.perclos, 0.0);
        assert_eq!(snap.headpose_var, 0.0);
    }
}
