//! Trend analysis over persisted history rows
//!
//! Produces a plain-text report with two sections: per-hour metric averages
//! and per-minute OLS slopes over a trailing window. The text layout is read
//! by downstream consumers, so it must stay stable and deterministic.

use crate::error::PipelineError;
use crate::types::{TrendMetric, TrendRecord};
use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;

/// Minimum rows inside the trailing window before slopes are reported
pub const MIN_TREND_SAMPLES: usize = 10;
/// Slopes within this band (per minute) are reported as steady
pub const SLOPE_DEAD_BAND: f64 = 0.01;
/// Report returned when no usable rows exist
pub const NOT_ENOUGH_DATA: &str = "Not enough data for trend analysis.";

/// Variance floor below which the time axis is considered degenerate
const MIN_X_VARIANCE: f64 = 1e-12;

const HOURLY_METRICS: [TrendMetric; 6] = [
    TrendMetric::Fatigue,
    TrendMetric::Stress,
    TrendMetric::Perclos,
    TrendMetric::YawnRate,
    TrendMetric::PostureAngle,
    TrendMetric::HeadposeVar,
];

const TREND_METRICS: [TrendMetric; 6] = [
    TrendMetric::Perclos,
    TrendMetric::YawnRate,
    TrendMetric::PostureAngle,
    TrendMetric::HeadposeVar,
    TrendMetric::Fatigue,
    TrendMetric::Stress,
];

/// Direction of a fitted slope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Steady,
}

impl TrendDirection {
    pub fn from_slope(slope: f64) -> Self {
        if slope > SLOPE_DEAD_BAND {
            TrendDirection::Increasing
        } else if slope < -SLOPE_DEAD_BAND {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Steady
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Steady => "steady",
        }
    }
}

/// Metric averages for one hour-of-day bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyAverage {
    /// Hour of day (0-23) in the timestamp's own offset
    pub hour: u32,
    /// Rows that fell into this bucket
    pub samples: usize,
    /// Averages in report order; metrics with no values are left out
    pub averages: Vec<(TrendMetric, f64)>,
}

/// Fitted slope for one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTrend {
    pub metric: TrendMetric,
    /// Change per minute, `None` when the metric had too few usable points
    pub slope: Option<f64>,
    pub direction: Option<TrendDirection>,
}

/// Trailing-window section of the report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrendSection {
    Insufficient { samples: usize },
    Slopes { metrics: Vec<MetricTrend> },
}

/// Structured form of a trend report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub window_min: u32,
    pub hourly: Vec<HourlyAverage>,
    pub trend: TrendSection,
}

impl TrendSummary {
    /// Render the stable plain-text report
    ///
    /// Every hourly average prints with one decimal, matching what downstream
    /// readers of the report parse.
    pub fn render(&self) -> String {
        let mut out = String::from("[Trend report]\n\n1. Hourly averages\n");
        for bucket in &self.hourly {
            let body = if bucket.averages.is_empty() {
                "no values".to_string()
            } else {
                bucket
                    .averages
                    .iter()
                    .map(|(metric, avg)| format!("{}:{:.1}", metric.as_str(), avg))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            out.push_str(&format!(" - {:02}h: {}\n", bucket.hour, body));
        }

        out.push_str(&format!(
            "\n2. Trend over the last {} min (change per minute)\n",
            self.window_min
        ));
        match &self.trend {
            TrendSection::Insufficient { samples } => {
                out.push_str(&format!(
                    " - insufficient data ({} of {} samples), still collecting\n",
                    samples, MIN_TREND_SAMPLES
                ));
            }
            TrendSection::Slopes { metrics } => {
                for trend in metrics {
                    match (trend.slope, trend.direction) {
                        (Some(slope), Some(direction)) => out.push_str(&format!(
                            " - {}: {} ({:+.3}/min)\n",
                            trend.metric.as_str(),
                            direction.as_str(),
                            slope
                        )),
                        _ => out.push_str(&format!(" - {}: no data\n", trend.metric.as_str())),
                    }
                }
            }
        }
        out
    }
}

/// A parsed row timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowTime {
    /// Hour of day in the timestamp's own offset
    pub hour: u32,
    /// Milliseconds since the epoch (naive timestamps are read as UTC)
    pub epoch_ms: i64,
}

/// Parse an RFC 3339 timestamp or a naive ISO-8601 one
pub fn parse_timestamp(ts: &str) -> Result<RowTime, PipelineError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Ok(RowTime {
            hour: dt.hour(),
            epoch_ms: dt.timestamp_millis(),
        });
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(ts, format) {
            return Ok(RowTime {
                hour: naive.hour(),
                epoch_ms: naive.and_utc().timestamp_millis(),
            });
        }
    }
    Err(PipelineError::DateParseError(ts.to_string()))
}

/// Parse history rows from a JSON array or newline-delimited JSON
pub fn parse_records(input: &str) -> Result<Vec<TrendRecord>, PipelineError> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(PipelineError::from))
        .collect()
}

/// Least-squares slope of y over x
pub fn ols_slope(points: &[(f64, f64)]) -> Result<f64, PipelineError> {
    if points.len() < 2 {
        return Err(PipelineError::InsufficientData(format!(
            "slope needs at least 2 points, got {}",
            points.len()
        )));
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, y) in points {
        sxx += (x - mean_x).powi(2);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if sxx / n < MIN_X_VARIANCE {
        return Err(PipelineError::DegenerateInput(
            "all points share the same time".to_string(),
        ));
    }
    Ok(sxy / sxx)
}

/// Stateless trend analyzer
pub struct TrendAnalyzer;

impl TrendAnalyzer {
    /// Text report over `records` with slopes over the last `window_min` minutes
    pub fn analyze(records: &[TrendRecord], window_min: u32) -> String {
        match Self::summarize(records, window_min) {
            Ok(summary) => summary.render(),
            Err(e) => {
                tracing::debug!(error = %e, "trend report skipped");
                NOT_ENOUGH_DATA.to_string()
            }
        }
    }

    /// Structured report; fails with `InsufficientData` when no row has a usable timestamp
    pub fn summarize(
        records: &[TrendRecord],
        window_min: u32,
    ) -> Result<TrendSummary, PipelineError> {
        let rows: Vec<(RowTime, &TrendRecord)> = records
            .iter()
            .filter_map(|record| match parse_timestamp(&record.ts) {
                Ok(time) => Some((time, record)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping history row with bad timestamp");
                    None
                }
            })
            .collect();

        if rows.is_empty() {
            return Err(PipelineError::InsufficientData(
                "no history rows".to_string(),
            ));
        }

        Ok(TrendSummary {
            window_min,
            hourly: hourly_averages(&rows),
            trend: trailing_trend(&rows, window_min),
        })
    }
}

fn hourly_averages(rows: &[(RowTime, &TrendRecord)]) -> Vec<HourlyAverage> {
    let mut buckets: BTreeMap<u32, Vec<&TrendRecord>> = BTreeMap::new();
    for (time, record) in rows {
        buckets.entry(time.hour).or_default().push(record);
    }

    buckets
        .into_iter()
        .map(|(hour, records)| {
            let averages = HOURLY_METRICS
                .iter()
                .filter_map(|metric| {
                    let values: Vec<f64> = records.iter().filter_map(|r| metric.value(r)).collect();
                    if values.is_empty() {
                        return None;
                    }
                    Some((*metric, values.iter().sum::<f64>() / values.len() as f64))
                })
                .collect();
            HourlyAverage {
                hour,
                samples: records.len(),
                averages,
            }
        })
        .collect()
}

fn trailing_trend(rows: &[(RowTime, &TrendRecord)], window_min: u32) -> TrendSection {
    let Some(now_ms) = rows.iter().map(|(time, _)| time.epoch_ms).max() else {
        return TrendSection::Insufficient { samples: 0 };
    };
    let cutoff_ms = now_ms - i64::from(window_min) * 60_000;
    let recent: Vec<&(RowTime, &TrendRecord)> = rows
        .iter()
        .filter(|(time, _)| time.epoch_ms >= cutoff_ms)
        .collect();

    if recent.len() < MIN_TREND_SAMPLES {
        return TrendSection::Insufficient {
            samples: recent.len(),
        };
    }

    let origin_ms = recent
        .iter()
        .map(|(time, _)| time.epoch_ms)
        .min()
        .unwrap_or(now_ms);

    let metrics = TREND_METRICS
        .iter()
        .map(|metric| {
            let points: Vec<(f64, f64)> = recent
                .iter()
                .filter_map(|(time, record)| {
                    let minutes = (time.epoch_ms - origin_ms) as f64 / 60_000.0;
                    metric.value(record).map(|v| (minutes, v))
                })
                .collect();
            let slope = ols_slope(&points).ok();
            MetricTrend {
                metric: *metric,
                slope,
                direction: slope.map(TrendDirection::from_slope),
            }
        })
        .collect();

    TrendSection::Slopes { metrics }
}
