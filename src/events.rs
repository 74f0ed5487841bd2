//! Blink and yawn event detection
//!
//! Each signal runs its own hysteresis state machine:
//! - blink: OPEN -> CLOSING when `ear < th_close`, back to OPEN (emitting a blink)
//!   when `ear > th_open`
//! - yawn: IDLE -> ACTIVE when `mar > th_yawn`, back to IDLE when `mar <= th_yawn`,
//!   emitting a yawn only if the excursion lasted at least `yawn_min_ms`
//!
//! Nodding is not detected yet. The flag is always present in the output and
//! always 0 until a periodicity detector over pitch history exists.

use crate::config::EventConfig;
use crate::types::{EventFlags, FeatureRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Capacity of the recent-blink ring (about two minutes at one blink per second)
pub const BLINK_HISTORY_CAPACITY: usize = 120;
/// Minimum sustained mouth opening for a yawn (ms)
pub const DEFAULT_YAWN_MIN_MS: f64 = 800.0;

/// Detection thresholds applied on each update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub close: f64,
    pub open: f64,
    pub yawn: f64,
}

impl Default for Thresholds {
    /// Population defaults used before calibration is ready
    fn default() -> Self {
        Self {
            close: 0.21,
            open: 0.25,
            yawn: 0.60,
        }
    }
}

/// Eye hysteresis state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EyeState {
    Open,
    Closing { since_ms: i64 },
}

/// Mouth hysteresis state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MouthState {
    Idle,
    Active { since_ms: i64 },
}

/// Per-session event detector
#[derive(Debug, Clone)]
pub struct EventDetector {
    thresholds: Thresholds,
    yawn_min_ms: f64,
    eye: EyeState,
    mouth: MouthState,
    blink_times: VecDeque<i64>,
}

impl Default for EventDetector {
    fn default() -> Self {
        Self::new(Thresholds::default(), DEFAULT_YAWN_MIN_MS)
    }
}

impl EventDetector {
    pub fn new(thresholds: Thresholds, yawn_min_ms: f64) -> Self {
        Self {
            thresholds,
            yawn_min_ms,
            eye: EyeState::Open,
            mouth: MouthState::Idle,
            blink_times: VecDeque::with_capacity(BLINK_HISTORY_CAPACITY),
        }
    }

    pub fn from_config(config: &EventConfig) -> Self {
        Self::new(config.initial_thresholds, config.yawn_min_ms)
    }

    /// Replace the thresholds. In-flight closing/active states are judged
    /// against the new values on the next update.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Process one frame stamped with the current wall-clock time
    pub fn update(&mut self, record: &FeatureRecord) -> EventFlags {
        self.update_at(Utc::now().timestamp_millis(), record)
    }

    /// Process one frame at `now_ms`.
    ///
    /// A signal whose ratio is missing keeps its state untouched for this frame.
    pub fn update_at(&mut self, now_ms: i64, record: &FeatureRecord) -> EventFlags {
        let mut flags = EventFlags::default();

        if let Some(ear) = record.ear {
            match self.eye {
                EyeState::Open if ear < self.thresholds.close => {
                    self.eye = EyeState::Closing { since_ms: now_ms };
                }
                EyeState::Closing { .. } if ear > self.thresholds.open => {
                    self.eye = EyeState::Open;
                    flags.blink = 1;
                    self.record_blink(now_ms);
                }
                _ => {}
            }
        }

        if let Some(mar) = record.mar {
            match self.mouth {
                MouthState::Idle if mar > self.thresholds.yawn => {
                    self.mouth = MouthState::Active { since_ms: now_ms };
                }
                MouthState::Active { since_ms } if mar <= self.thresholds.yawn => {
                    self.mouth = MouthState::Idle;
                    let duration_ms = (now_ms - since_ms) as f64;
                    if duration_ms >= self.yawn_min_ms {
                        flags.yawn = 1;
                    } else {
                        tracing::debug!(duration_ms, "mouth opening too short for a yawn");
                    }
                }
                _ => {}
            }
        }

        flags
    }

    fn record_blink(&mut self, now_ms: i64) {
        self.blink_times.push_back(now_ms);
        while self.blink_times.len() > BLINK_HISTORY_CAPACITY {
            self.blink_times.pop_front();
        }
    }

    pub fn eye_state(&self) -> EyeState {
        self.eye
    }

    pub fn mouth_state(&self) -> MouthState {
        self.mouth
    }

    /// Timestamps of the most recent blinks, oldest first
    pub fn recent_blinks(&self) -> impl Iterator<Item = i64> + '_ {
        self.blink_times.iter().copied()
    }

    /// Number of remembered blinks at or after `since_ms`
    pub fn blinks_since(&self, since_ms: i64) -> usize {
        self.blink_times.iter().filter(|&&t| t >= since_ms).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eye(ear: f64) -> FeatureRecord {
        FeatureRecord {
            ear: Some(ear),
            mar: Some(0.2),
            ..Default::default()
        }
    }

    fn mouth(mar: f64) -> FeatureRecord {
        FeatureRecord {
            ear: Some(0.3),
            mar: Some(mar),
            ..Default::default()
        }
    }

    #[test]
    fn test_blink_scenario() {
        let mut detector = EventDetector::new(
            Thresholds {
                close: 0.21,
                open: 0.25,
                yawn: 0.6,
            },
            DEFAULT_YAWN_MIN_MS,
        );
        let blinks: Vec<u8> = [0.30, 0.10, 0.10, 0.28]
            .iter()
            .enumerate()
            .map(|(i, &e)| detector.update_at(i as i64 * 33, &eye(e)).blink)
            .collect();
        assert_eq!(blinks, vec![0, 0, 0, 1]);
        assert_eq!(detector.recent_blinks().collect::<Vec<_>>(), vec![99]);
    }

    #[test]
    fn test_no_blink_inside_hysteresis_band() {
        let mut detector = EventDetector::default();
        // closes, then hovers between close and open thresholds
        let mut total = 0;
        for (i, e) in [0.30, 0.18, 0.23, 0.22, 0.24, 0.23].iter().enumerate() {
            total += detector.update_at(i as i64, &eye(*e)).blink;
        }
        assert_eq!(total, 0);
        assert!(matches!(detector.eye_state(), EyeState::Closing { since_ms: 1 }));

        // reopening past th_open completes the blink
        assert_eq!(detector.update_at(10, &eye(0.26)).blink, 1);
        assert_eq!(detector.eye_state(), EyeState::Open);
    }

    #[test]
    fn test_blink_count_matches_full_cycles() {
        let mut detector = EventDetector::default();
        let pattern = [0.3, 0.1, 0.3, 0.22, 0.1, 0.1, 0.3, 0.3, 0.15, 0.24, 0.26];
        let total: u32 = pattern
            .iter()
            .enumerate()
            .map(|(i, e)| detector.update_at(i as i64, &eye(*e)).blink as u32)
            .sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_short_mouth_opening_is_not_a_yawn() {
        let mut detector = EventDetector::default();
        assert_eq!(detector.update_at(0, &mouth(0.7)).yawn, 0);
        assert_eq!(detector.update_at(500, &mouth(0.7)).yawn, 0);
        assert_eq!(detector.update_at(799, &mouth(0.3)).yawn, 0);
        assert_eq!(detector.mouth_state(), MouthState::Idle);
    }

    #[test]
    fn test_sustained_mouth_opening_is_one_yawn() {
        let mut detector = EventDetector::default();
        let mut yawns = 0;
        yawns += detector.update_at(0, &mouth(0.7)).yawn;
        yawns += detector.update_at(400, &mouth(0.8)).yawn;
        yawns += detector.update_at(800, &mouth(0.6)).yawn; // <= threshold closes
        yawns += detector.update_at(900, &mouth(0.3)).yawn;
        assert_eq!(yawns, 1);
    }

    #[test]
    fn test_nodding_always_zero() {
        let mut detector = EventDetector::default();
        for i in 0..50 {
            let flags = detector.update_at(i * 10, &eye(if i % 2 == 0 { 0.1 } else { 0.3 }));
            assert_eq!(flags.nodding, 0);
        }
    }

    #[test]
    fn test_missing_ratio_keeps_state() {
        let mut detector = EventDetector::default();
        detector.update_at(0, &eye(0.1));
        let blank = FeatureRecord::default();
        assert_eq!(detector.update_at(10, &blank), EventFlags::default());
        assert!(matches!(detector.eye_state(), EyeState::Closing { .. }));
        assert_eq!(detector.update_at(20, &eye(0.3)).blink, 1);
    }

    #[test]
    fn test_threshold_change_applies_to_in_flight_state() {
        let mut detector = EventDetector::default();
        detector.update_at(0, &eye(0.15));
        // raise the open threshold: 0.28 no longer reopens
        detector.set_thresholds(Thresholds {
            close: 0.25,
            open: 0.30,
            yawn: 0.6,
        });
        assert_eq!(detector.update_at(10, &eye(0.28)).blink, 0);
        assert_eq!(detector.update_at(20, &eye(0.31)).blink, 1);
    }

    #[test]
    fn test_blink_history_is_bounded() {
        let mut detector = EventDetector::default();
        for i in 0..300 {
            detector.update_at(i * 2, &eye(0.1));
            detector.update_at(i * 2 + 1, &eye(0.3));
        }
        assert_eq!(detector.recent_blinks().count(), BLINK_HISTORY_CAPACITY);
        assert_eq!(detector.recent_blinks().next(), Some(361));
        assert_eq!(detector.blinks_since(500), 50);
    }
}
