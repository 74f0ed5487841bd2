//! Per-session frame processing
//!
//! [`SessionProcessor`] owns every stateful stage for one viewer and runs the
//! per-frame path: calibration, threshold hand-off, event detection, window
//! aggregation, fusion and index computation. It also keeps cumulative event
//! counts, a short in-memory index history, and emits one [`HistoryRow`] per
//! log interval for persistence.

use crate::calibrator::Calibrator;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{EventDetector, Thresholds};
use crate::indices::IndexFuser;
use crate::types::{
    CalibrationStatus, EventFlags, FeatureRecord, FrameQuality, FusedFeatures, Indices,
    TrendRecord, WindowSnapshot,
};
use crate::window::WindowAggregator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of recent index values kept in memory
pub const HISTORY_CAPACITY: usize = 100;

/// Row handed to persistence once per log interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub ts: DateTime<Utc>,
    pub perclos: f64,
    pub yawn_rate: f64,
    pub posture_angle: f64,
    pub headpose_var: f64,
    pub fatigue: f64,
    pub stress: f64,
    pub blink: bool,
    pub yawn: bool,
    pub nodding: bool,
}

impl HistoryRow {
    /// Convert to the row shape read back by trend analysis
    pub fn to_trend_record(&self) -> TrendRecord {
        TrendRecord {
            ts: self.ts.to_rfc3339(),
            perclos: Some(self.perclos),
            yawn_rate: Some(self.yawn_rate),
            posture_angle: Some(self.posture_angle),
            headpose_var: Some(self.headpose_var),
            fatigue: Some(self.fatigue),
            stress: Some(self.stress),
        }
    }
}

/// Emits a history row at most once per interval
#[derive(Debug, Clone)]
pub struct HistoryLogger {
    interval_ms: i64,
    last_ms: Option<i64>,
}

impl HistoryLogger {
    pub fn new(interval_sec: f64) -> Self {
        Self {
            interval_ms: (interval_sec * 1000.0) as i64,
            last_ms: None,
        }
    }

    /// Row for this frame if a full interval has passed since the last one.
    ///
    /// The first call only starts the clock.
    pub fn poll(
        &mut self,
        now_ms: i64,
        fused: &FusedFeatures,
        indices: &Indices,
        events: &EventFlags,
    ) -> Option<HistoryRow> {
        let last = match self.last_ms {
            Some(last) => last,
            None => {
                self.last_ms = Some(now_ms);
                return None;
            }
        };
        if now_ms - last < self.interval_ms {
            return None;
        }
        self.last_ms = Some(now_ms);

        Some(HistoryRow {
            ts: DateTime::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now),
            perclos: fused.perclos,
            yawn_rate: fused.yawn_rate_min,
            posture_angle: fused.posture_angle_norm,
            headpose_var: fused.headpose_var,
            fatigue: indices.fatigue,
            stress: indices.stress,
            blink: events.blink != 0,
            yawn: events.yawn != 0,
            nodding: events.nodding != 0,
        })
    }
}

/// Event totals since the session started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeStats {
    pub blink_count: u64,
    pub yawn_count: u64,
    pub nodding_count: u64,
}

impl CumulativeStats {
    fn record(&mut self, events: &EventFlags) {
        self.blink_count += u64::from(events.blink);
        self.yawn_count += u64::from(events.yawn);
        self.nodding_count += u64::from(events.nodding);
    }
}

/// One entry of the in-memory index history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub ts_ms: i64,
    pub fatigue: f64,
    pub stress: f64,
    pub perclos: f64,
}

/// Everything produced for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOutput {
    pub ts_ms: i64,
    pub events: EventFlags,
    pub fused: FusedFeatures,
    pub snapshot: Option<WindowSnapshot>,
    pub indices: Indices,
    pub distance_cm: f64,
    pub quality: FrameQuality,
    pub detection_enabled: bool,
    pub calibration: CalibrationStatus,
    /// Thresholds the detector used for this frame
    pub thresholds: Thresholds,
    pub cumulative: CumulativeStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_row: Option<HistoryRow>,
}

/// Stateful processor for one session
#[derive(Debug)]
pub struct SessionProcessor {
    calibrator: Calibrator,
    detector: EventDetector,
    window: WindowAggregator,
    logger: HistoryLogger,
    detection_enabled: bool,
    cumulative: CumulativeStats,
    history: VecDeque<HistoryPoint>,
}

impl Default for SessionProcessor {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl SessionProcessor {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            calibrator: Calibrator::from_config(&config.calibration),
            detector: EventDetector::from_config(&config.events),
            window: WindowAggregator::new(config.window_sec),
            logger: HistoryLogger::new(config.log_interval_sec),
            detection_enabled: true,
            cumulative: CumulativeStats::default(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Process one frame stamped with the current wall-clock time
    pub fn process_now(&mut self, record: FeatureRecord) -> FrameOutput {
        self.process(Utc::now().timestamp_millis(), record)
    }

    /// Process one frame at `ts_ms`. Timestamps must be non-decreasing.
    pub fn process(&mut self, ts_ms: i64, record: FeatureRecord) -> FrameOutput {
        self.calibrator.consume(&record);
        if self.calibrator.is_ready() {
            self.detector.set_thresholds(self.calibrator.thresholds());
        }
        let thresholds = self.detector.thresholds();
        let distance_cm = record.distance_cm;
        let quality = record.quality;

        let (events, fused, snapshot, indices, history_row) = if self.detection_enabled {
            let events = self.detector.update_at(ts_ms, &record);
            let extras = record.clone();
            self.window.update_at(ts_ms, record, events);
            let snapshot = self.window.snapshot();
            let fused = FusedFeatures::fuse(snapshot.as_ref(), &extras);
            let indices = IndexFuser::compute(&fused);

            self.cumulative.record(&events);
            let history_row = self.logger.poll(ts_ms, &fused, &indices, &events);
            self.push_history(HistoryPoint {
                ts_ms,
                fatigue: indices.fatigue,
                stress: indices.stress,
                perclos: fused.perclos,
            });
            (events, fused, snapshot, indices, history_row)
        } else {
            (
                EventFlags::default(),
                FusedFeatures::from_frame(&record),
                None,
                Indices::default(),
                None,
            )
        };

        FrameOutput {
            ts_ms,
            events,
            fused,
            snapshot,
            indices,
            distance_cm,
            quality,
            detection_enabled: self.detection_enabled,
            calibration: self.calibrator.status(),
            thresholds,
            cumulative: self.cumulative,
            history_row,
        }
    }

    fn push_history(&mut self, point: HistoryPoint) {
        self.history.push_back(point);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    /// Turn event detection and aggregation on or off. Calibration keeps running.
    pub fn set_detection(&mut self, enabled: bool) {
        if self.detection_enabled != enabled {
            tracing::info!(enabled, "event detection toggled");
        }
        self.detection_enabled = enabled;
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    /// Current window aggregates
    pub fn snapshot(&self) -> Option<WindowSnapshot> {
        self.window.snapshot()
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.calibrator.status()
    }

    /// Thresholds currently applied by the detector
    pub fn thresholds(&self) -> Thresholds {
        self.detector.thresholds()
    }

    pub fn cumulative(&self) -> CumulativeStats {
        self.cumulative
    }

    /// Recent index values, oldest first
    pub fn recent_history(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.history.iter()
    }

    /// Restore calibrator state saved by [`Self::save_calibration`]
    pub fn load_calibration(&mut self, json: &str) -> Result<(), PipelineError> {
        self.calibrator = Calibrator::from_json(json)?;
        if self.calibrator.is_ready() {
            self.detector.set_thresholds(self.calibrator.thresholds());
        }
        Ok(())
    }

    /// Serialize calibrator state to JSON
    pub fn save_calibration(&self) -> Result<String, PipelineError> {
        Ok(self.calibrator.to_json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::parse_timestamp;

    fn good() -> FrameQuality {
        FrameQuality {
            fps: 30.0,
            occlusion: 0.0,
            lighting: 0.5,
        }
    }

    fn frame(ear: f64, quality: FrameQuality) -> FeatureRecord {
        FeatureRecord::with_ratios(ear, 0.2, quality)
    }

    #[test]
    fn test_calibration_hands_thresholds_to_detector() {
        let mut session = SessionProcessor::default();
        assert_eq!(session.thresholds(), Thresholds::default());

        // default warmup holds 200 samples and activates at 120
        let mut output = None;
        for i in 0..200 {
            output = Some(session.process(i * 50, frame(0.3, good())));
        }
        let output = output.unwrap();
        assert!(output.calibration.ready);
        assert!((output.thresholds.close - 0.195).abs() < 1e-9);
        assert!((output.thresholds.open - 0.225).abs() < 1e-9);
        // constant mouth ratio: MAD floors at 1e-3
        assert!((output.thresholds.yawn - 0.203).abs() < 1e-9);
        assert_eq!(session.thresholds(), output.thresholds);
    }

    #[test]
    fn test_cumulative_blink_count() {
        let mut session = SessionProcessor::default();
        let mut ts = 0;
        for _ in 0..5 {
            for ear in [0.3, 0.1, 0.3] {
                // poor quality keeps the default thresholds
                session.process(ts, frame(ear, FrameQuality::default()));
                ts += 40;
            }
        }
        assert_eq!(session.cumulative().blink_count, 5);
        assert_eq!(session.cumulative().yawn_count, 0);
        assert_eq!(session.cumulative().nodding_count, 0);
    }

    #[test]
    fn test_detection_disabled() {
        let mut session = SessionProcessor::default();
        session.set_detection(false);
        let record = FeatureRecord {
            ear: Some(0.1),
            mar: Some(0.2),
            posture_angle_norm: 0.4,
            gaze_on_pct: 0.9,
            near_work: 1.0,
            ..Default::default()
        };
        let output = session.process(0, record);
        assert!(!output.detection_enabled);
        assert_eq!(output.events, EventFlags::default());
        assert_eq!(output.indices, Indices::default());
        assert!(output.snapshot.is_none());
        assert_eq!(output.fused.perclos, 0.0);
        assert_eq!(output.fused.posture_angle_norm, 0.4);
        assert_eq!(output.fused.gaze_on_pct, 0.9);
        assert_eq!(output.fused.near_work, 1.0);
        assert!(session.snapshot().is_none());
        assert_eq!(session.recent_history().count(), 0);
    }

    #[test]
    fn test_detection_enabled_uses_window() {
        let mut session = SessionProcessor::default();
        let mut output = None;
        for i in 0..20 {
            output = Some(session.process(i * 50, frame(0.15, FrameQuality::default())));
        }
        let output = output.unwrap();
        let snapshot = output.snapshot.unwrap();
        assert_eq!(snapshot.sample_count, 20);
        assert_eq!(output.fused.perclos, 1.0);
        assert!(output.indices.fatigue >= 45.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = SessionProcessor::default();
        for i in 0..150 {
            session.process(i * 10, frame(0.3, good()));
        }
        let history: Vec<&HistoryPoint> = session.recent_history().collect();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].ts_ms, 500);
    }

    #[test]
    fn test_history_rows_every_interval() {
        let mut session = SessionProcessor::default();
        let rows: Vec<HistoryRow> = (0..=25)
            .filter_map(|sec| session.process(sec * 1000, frame(0.3, good())).history_row)
            .collect();
        let times: Vec<i64> = rows.iter().map(|r| r.ts.timestamp_millis()).collect();
        assert_eq!(times, vec![10_000, 20_000]);
    }

    #[test]
    fn test_history_logger_interval() {
        let mut logger = HistoryLogger::new(10.0);
        let fused = FusedFeatures::default();
        let indices = Indices {
            fatigue: 12.0,
            stress: 34.0,
        };
        let events = EventFlags {
            blink: 1,
            ..Default::default()
        };
        assert!(logger.poll(1_000, &fused, &indices, &events).is_none());
        assert!(logger.poll(10_999, &fused, &indices, &events).is_none());
        let row = logger.poll(11_000, &fused, &indices, &events).unwrap();
        assert_eq!(row.fatigue, 12.0);
        assert!(row.blink);
        assert!(!row.yawn);
        assert!(logger.poll(12_000, &fused, &indices, &events).is_none());
    }

    #[test]
    fn test_history_row_to_trend_record() {
        let row = HistoryRow {
            ts: DateTime::from_timestamp_millis(1_714_572_000_000).unwrap(),
            perclos: 0.1,
            yawn_rate: 0.5,
            posture_angle: 0.2,
            headpose_var: 0.01,
            fatigue: 30.0,
            stress: 20.0,
            blink: false,
            yawn: false,
            nodding: false,
        };
        let record = row.to_trend_record();
        assert_eq!(record.fatigue, Some(30.0));
        let parsed = parse_timestamp(&record.ts).unwrap();
        assert_eq!(parsed.epoch_ms, 1_714_572_000_000);
    }

    #[test]
    fn test_calibration_save_and_load() {
        let mut session = SessionProcessor::default();
        for i in 0..200 {
            session.process(i * 50, frame(0.4, good()));
        }
        let saved = session.save_calibration().unwrap();

        let mut restored = SessionProcessor::default();
        restored.load_calibration(&saved).unwrap();
        assert!(restored.calibration_status().ready);
        assert_eq!(restored.thresholds(), session.thresholds());

        assert!(matches!(
            restored.load_calibration("not json"),
            Err(PipelineError::JsonError(_))
        ));
    }
}
