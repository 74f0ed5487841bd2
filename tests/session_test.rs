//! End-to-end tests for the session pipeline and trend reporting

use pretty_assertions::assert_eq;
use wellbeing_flux::landmarks::{FaceGeometry, Point};
use wellbeing_flux::trend::{TrendSection, NOT_ENOUGH_DATA};
use wellbeing_flux::{
    FeatureExtractor, FeatureRecord, FrameQuality, PipelineConfig, SessionHandle,
    SessionProcessor, TrendAnalyzer, TrendRecord,
};

const FRAME_MS: i64 = 50;

fn good() -> FrameQuality {
    FrameQuality {
        fps: 20.0,
        occlusion: 0.0,
        lighting: 0.6,
    }
}

fn frame(ear: f64, mar: f64) -> FeatureRecord {
    FeatureRecord {
        ear: Some(ear),
        mar: Some(mar),
        posture_angle_norm: 0.1,
        gaze_on_pct: 0.8,
        quality: good(),
        ..Default::default()
    }
}

/// Calibrate on a steady face, returning the next free timestamp
fn warm_up(session: &mut SessionProcessor) -> i64 {
    let mut ts = 0;
    while !session.calibration_status().ready {
        session.process(ts, frame(0.32, 0.25));
        ts += FRAME_MS;
        assert!(ts < 60_000, "calibration never became ready");
    }
    ts
}

#[test]
fn test_calibrated_session_detects_events() {
    let mut session = SessionProcessor::default();
    let mut ts = warm_up(&mut session);

    let thresholds = session.thresholds();
    // eye baseline 0.32 -> close 0.208, open 0.238
    assert!((thresholds.close - 0.208).abs() < 1e-6);
    assert!((thresholds.open - 0.238).abs() < 1e-6);

    // three blinks
    for _ in 0..3 {
        for ear in [0.32, 0.12, 0.12, 0.32] {
            session.process(ts, frame(ear, 0.25));
            ts += FRAME_MS;
        }
    }
    // one yawn held for a second
    for i in 0..30 {
        let mar = if (5..25).contains(&i) { 0.8 } else { 0.25 };
        session.process(ts, frame(0.32, mar));
        ts += FRAME_MS;
    }

    let totals = session.cumulative();
    assert_eq!(totals.blink_count, 3);
    assert_eq!(totals.yawn_count, 1);
    assert_eq!(totals.nodding_count, 0);

    let snapshot = session.snapshot().unwrap();
    assert!(snapshot.perclos > 0.0);
    assert!(snapshot.yawn_rate_min > 0.0);
}

#[test]
fn test_indices_stay_in_range() {
    let mut session = SessionProcessor::default();
    let mut ts = 0;
    for i in 0..2_000 {
        let ear = if i % 7 == 0 { 0.05 } else { 0.35 };
        let mar = if i % 200 < 30 { 0.9 } else { 0.2 };
        let output = session.process(ts, frame(ear, mar));
        assert!((0.0..=100.0).contains(&output.indices.fatigue));
        assert!((0.0..=100.0).contains(&output.indices.stress));
        ts += FRAME_MS;
    }
}

#[test]
fn test_history_rows_feed_trend_report() {
    let mut config = PipelineConfig::default();
    config.log_interval_sec = 1.0;
    let mut session = SessionProcessor::from_config(&config);

    // 20 minutes at one frame per second, eyes closing more over time
    let start_ms = 1_714_572_000_000;
    let mut rows: Vec<TrendRecord> = Vec::new();
    for sec in 0..1_200 {
        let ear = if sec % 60 < sec / 60 { 0.1 } else { 0.3 };
        let output = session.process(start_ms + sec * 1000, frame(ear, 0.2));
        if let Some(row) = output.history_row {
            rows.push(row.to_trend_record());
        }
    }
    assert!(rows.len() > 1_000);

    let summary = TrendAnalyzer::summarize(&rows, 10).unwrap();
    match &summary.trend {
        TrendSection::Slopes { metrics } => assert_eq!(metrics.len(), 6),
        other => panic!("expected slopes, got {other:?}"),
    }
    let report = TrendAnalyzer::analyze(&rows, 10);
    assert!(report.contains(" - perclos: increasing"), "{report}");
    assert!(report.contains(" - fatigue: increasing"), "{report}");
    assert_eq!(report, TrendAnalyzer::analyze(&rows, 10));
}

#[test]
fn test_trend_without_history() {
    assert_eq!(TrendAnalyzer::analyze(&[], 10), NOT_ENOUGH_DATA);
}

#[test]
fn test_extracted_frames_drive_session() {
    let eye = |cx: f64, half_height: f64| {
        [
            Point::new(cx - 0.05, 0.4),
            Point::new(cx - 0.02, 0.4 - half_height),
            Point::new(cx + 0.02, 0.4 - half_height),
            Point::new(cx + 0.05, 0.4),
            Point::new(cx + 0.02, 0.4 + half_height),
            Point::new(cx - 0.02, 0.4 + half_height),
        ]
    };
    let face = |half_height: f64| FaceGeometry {
        image_width: 100.0,
        image_height: 100.0,
        left_eye: eye(0.35, half_height),
        right_eye: eye(0.65, half_height),
        mouth_top: Point::new(0.5, 0.70),
        mouth_bottom: Point::new(0.5, 0.72),
        mouth_left: Point::new(0.4, 0.71),
        mouth_right: Point::new(0.6, 0.71),
        left_eye_corner: Point::new(0.45, 0.4),
        right_eye_corner: Point::new(0.55, 0.4),
        nose_tip: Point::new(0.5, 0.4),
        target_distance_cm: None,
    };

    let extractor = FeatureExtractor::new(20.0);
    let mut session = SessionProcessor::default();
    // open 0.3, closed 0.1
    let heights = [0.015, 0.005, 0.005, 0.015];
    let mut blinks = 0;
    for (i, h) in heights.iter().enumerate() {
        let record = extractor.extract(Some(&face(*h)), None, Some(128.0));
        blinks += session.process(i as i64 * FRAME_MS, record).events.blink;
    }
    assert_eq!(blinks, 1);

    // eye corners 10 px apart put the viewer far away
    let record = extractor.extract(Some(&face(0.015)), None, None);
    assert_eq!(record.near_work, 0.0);

    // a frame with no face leaves the eye state alone
    let output = session.process(1_000, extractor.extract(None, None, None));
    assert_eq!(output.events.blink, 0);
}

#[test]
fn test_session_handle_round_trip() {
    let handle = SessionHandle::spawn(&PipelineConfig::default()).unwrap();
    let mut ts = 0;
    while !handle.calibration().unwrap().ready {
        handle.process(ts, frame(0.3, 0.2)).unwrap();
        ts += FRAME_MS;
        assert!(ts < 60_000, "calibration never became ready");
    }

    handle.set_detection(false).unwrap();
    let output = handle.process(ts, frame(0.1, 0.2)).unwrap();
    assert!(!output.detection_enabled);
    assert_eq!(output.indices.fatigue, 0.0);

    handle.set_detection(true).unwrap();
    let output = handle.process(ts + FRAME_MS, frame(0.1, 0.2)).unwrap();
    assert!(output.detection_enabled);
    assert!(handle.snapshot().unwrap().is_some());
    handle.shutdown();
}
