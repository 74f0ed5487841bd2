//! Wellbeing Flux - On-device compute engine for camera-derived wellbeing signals
//!
//! Flux turns per-frame face measurements into fatigue and stress signals through
//! a deterministic pipeline: personal calibration → event detection → window
//! aggregation → index fusion. A separate batch stage summarizes persisted
//! history into hourly averages and short-horizon trends.
//!
//! ## Modules
//!
//! - **Session Pipeline**: [`SessionProcessor`] runs the per-frame path for one viewer,
//!   [`SessionHandle`] runs it on a dedicated worker thread
//! - **Trend Analysis**: [`TrendAnalyzer`] renders a plain-text report from history rows
//! - **Landmarks**: geometry that turns face landmarks into [`FeatureRecord`]s

pub mod actor;
pub mod calibrator;
pub mod config;
pub mod error;
pub mod events;
pub mod indices;
pub mod landmarks;
pub mod session;
pub mod trend;
pub mod types;
pub mod window;

pub use actor::SessionHandle;
pub use calibrator::Calibrator;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use events::{EventDetector, Thresholds};
pub use indices::IndexFuser;
pub use landmarks::FeatureExtractor;
pub use session::{FrameOutput, HistoryRow, SessionProcessor};
pub use trend::TrendAnalyzer;
pub use types::{EventFlags, FeatureRecord, FrameQuality, Indices, TrendRecord, WindowSnapshot};
pub use window::WindowAggregator;

/// Flux version reported by the CLI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "wellbeing-flux";
