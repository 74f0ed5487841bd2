//! Wellbeing CLI - Command-line interface for Wellbeing Flux
//!
//! Commands:
//! - run: Process per-frame features from stdin (streaming mode)
//! - trend: Summarize persisted history rows into a trend report
//! - doctor: Diagnose configuration and calibration files
//! - schema: Print input and output record layouts

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use wellbeing_flux::trend::{parse_records, TrendAnalyzer};
use wellbeing_flux::{
    Calibrator, FeatureRecord, PipelineConfig, PipelineError, SessionProcessor, FLUX_VERSION,
    PRODUCER_NAME,
};

/// Wellbeing Flux - On-device compute engine for camera-derived wellbeing signals
#[derive(Parser)]
#[command(name = "wellbeing")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLUX_VERSION)]
#[command(about = "Turn per-frame face features into fatigue and stress signals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process per-frame features from stdin (streaming mode)
    Run {
        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Append one history row per log interval to this file (NDJSON)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Load calibration state from file
        #[arg(long)]
        load_calibration: Option<PathBuf>,

        /// Save calibration state to file on exit
        #[arg(long)]
        save_calibration: Option<PathBuf>,

        /// Buffer output instead of flushing after each frame
        #[arg(long)]
        no_flush: bool,
    },

    /// Summarize history rows into a trend report
    Trend {
        /// Input file path (use - for stdin); NDJSON or a JSON array
        #[arg(short, long)]
        input: PathBuf,

        /// Trailing window for slopes, in minutes (defaults to the config value)
        #[arg(long)]
        window_min: Option<u32>,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output the structured summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and calibration files
    Doctor {
        /// Check configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check calibration file
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one frame output per line)
    Ndjson,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Per-frame input line
    Input,
    /// Per-frame output line
    Output,
    /// History row
    History,
}

/// One line of `run` input
#[derive(Deserialize)]
#[serde(untagged)]
enum InputLine {
    Control(ControlCommand),
    Frame(FrameInput),
}

#[derive(Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ControlCommand {
    /// Turn event detection on or off
    Detect { enable: bool },
}

#[derive(Deserialize)]
struct FrameInput {
    /// Frame time in epoch milliseconds; wall clock when absent
    #[serde(default)]
    ts_ms: Option<i64>,
    features: FeatureRecord,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), WellbeingCliError> {
    match cli.command {
        Commands::Run {
            config,
            output_format,
            history,
            load_calibration,
            save_calibration,
            no_flush,
        } => cmd_run(
            config.as_deref(),
            output_format,
            history.as_deref(),
            load_calibration.as_deref(),
            save_calibration.as_deref(),
            !no_flush,
        ),

        Commands::Trend {
            input,
            window_min,
            config,
            json,
        } => cmd_trend(&input, window_min, config.as_deref(), json),

        Commands::Doctor {
            config,
            calibration,
            json,
        } => cmd_doctor(config.as_deref(), calibration.as_deref(), json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, WellbeingCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::load(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn cmd_run(
    config: Option<&Path>,
    output_format: OutputFormat,
    history: Option<&Path>,
    load_calibration: Option<&Path>,
    save_calibration: Option<&Path>,
    flush: bool,
) -> Result<(), WellbeingCliError> {
    let config = load_config(config)?;
    let mut session = SessionProcessor::from_config(&config);

    if let Some(path) = load_calibration {
        let json = fs::read_to_string(path)?;
        session.load_calibration(&json)?;
        tracing::info!(path = %path.display(), "calibration restored");
    }

    let mut history_out: Option<BufWriter<File>> = match history {
        Some(path) => Some(BufWriter::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut frames = 0u64;

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let input: InputLine = serde_json::from_str(trimmed).map_err(|e| {
            WellbeingCliError::ParseError(format!("Failed to parse input line: {}", e))
        })?;

        let frame = match input {
            InputLine::Control(ControlCommand::Detect { enable }) => {
                session.set_detection(enable);
                continue;
            }
            InputLine::Frame(frame) => frame,
        };

        let output = match frame.ts_ms {
            Some(ts_ms) => session.process(ts_ms, frame.features),
            None => session.process_now(frame.features),
        };
        frames += 1;

        if let (Some(writer), Some(row)) = (history_out.as_mut(), output.history_row.as_ref()) {
            writeln!(writer, "{}", serde_json::to_string(row)?)?;
        }

        let rendered = match output_format {
            OutputFormat::Ndjson => serde_json::to_string(&output)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&output)?,
        };
        writeln!(stdout, "{}", rendered)?;
        if flush {
            stdout.flush()?;
        }
    }

    stdout.flush()?;
    if let Some(writer) = history_out.as_mut() {
        writer.flush()?;
    }

    let totals = session.cumulative();
    tracing::info!(
        frames,
        blinks = totals.blink_count,
        yawns = totals.yawn_count,
        "input exhausted"
    );

    if let Some(path) = save_calibration {
        fs::write(path, session.save_calibration()?)?;
    }

    Ok(())
}

fn cmd_trend(
    input: &Path,
    window_min: Option<u32>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), WellbeingCliError> {
    let config = load_config(config)?;
    let window_min = window_min.unwrap_or(config.trend_window_min);

    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let records = parse_records(&input_data)?;

    if json {
        let summary = TrendAnalyzer::summarize(&records, window_min)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", TrendAnalyzer::analyze(&records, window_min));
    }

    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    calibration: Option<&Path>,
    json: bool,
) -> Result<(), WellbeingCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Flux version {}", FLUX_VERSION),
    });

    if let Some(path) = config {
        checks.push(if path.exists() {
            match PipelineConfig::load(path) {
                Ok(config) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid (window {} s, warmup {} s at {} fps)",
                        config.window_sec, config.calibration.warmup_sec, config.calibration.fps
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        } else {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, defaults will be used".to_string(),
            }
        });
    }

    if let Some(path) = calibration {
        checks.push(if path.exists() {
            match fs::read_to_string(path)
                .map_err(PipelineError::from)
                .and_then(|content| Calibrator::from_json(&content).map_err(PipelineError::from))
            {
                Ok(calibrator) => DoctorCheck {
                    name: "calibration".to_string(),
                    status: CheckStatus::Ok,
                    message: if calibrator.is_ready() {
                        format!(
                            "Calibration ready (close {:.3}, open {:.3}, yawn {:.3})",
                            calibrator.th_close(),
                            calibrator.th_open(),
                            calibrator.th_yawn()
                        )
                    } else {
                        format!("Calibration warming up ({:.0}%)", calibrator.progress())
                    },
                },
                Err(e) => DoctorCheck {
                    name: "calibration".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid calibration file: {}", e),
                },
            }
        } else {
            DoctorCheck {
                name: "calibration".to_string(),
                status: CheckStatus::Warning,
                message: "Calibration file does not exist".to_string(),
            }
        });
    }

    // Check stdin is available (for streaming mode)
    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Wellbeing Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(WellbeingCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), WellbeingCliError> {
    match schema_type {
        SchemaType::Input => {
            println!("Input: one JSON object per line");
            println!();
            println!("Frame line:");
            println!("- ts_ms: epoch milliseconds (optional, wall clock when absent)");
            println!("- features:");
            println!("  - ear, mar: eye/mouth aspect ratios (optional)");
            println!("  - posture_angle_norm (default 0.0), gaze_on_pct (default 0.7)");
            println!("  - near_work (default 0.0), facial_tension (default 0.5)");
            println!("  - blink_var (default 0.2), distance_cm (default 50)");
            println!("  - quality: {{ fps, occlusion, lighting }} (default fails the quality gate)");
            println!();
            println!("Control line:");
            println!("- {{\"cmd\": \"detect\", \"enable\": true|false}}");
        }
        SchemaType::Output => {
            println!("Output: one JSON object per frame");
            println!();
            println!("- ts_ms");
            println!("- events: {{ blink, yawn, nodding }} (0 or 1)");
            println!("- fused: {{ perclos, yawn_rate_min, posture_angle_norm, headpose_var,");
            println!("           gaze_on_pct, near_work, facial_tension, blink_var }}");
            println!("- snapshot: window aggregates or null");
            println!("- indices: {{ fatigue, stress }} (0-100)");
            println!("- distance_cm, quality, detection_enabled");
            println!("- calibration: {{ ready, progress, th_close, th_open, th_yawn }}");
            println!("- thresholds: {{ close, open, yawn }} applied to this frame");
            println!("- cumulative: {{ blink_count, yawn_count, nodding_count }}");
            println!("- history_row: present once per log interval");
        }
        SchemaType::History => {
            println!("History row (written by `run --history`, read by `trend`):");
            println!();
            println!("- ts: RFC 3339 timestamp");
            println!("- perclos, yawn_rate, posture_angle, headpose_var");
            println!("- fatigue, stress");
            println!("- blink, yawn, nodding: flags of the logged frame");
        }
    }

    Ok(())
}

// Error types

#[derive(Debug)]
enum WellbeingCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for WellbeingCliError {
    fn from(e: io::Error) -> Self {
        WellbeingCliError::Io(e)
    }
}

impl From<PipelineError> for WellbeingCliError {
    fn from(e: PipelineError) -> Self {
        WellbeingCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for WellbeingCliError {
    fn from(e: serde_json::Error) -> Self {
        WellbeingCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<WellbeingCliError> for CliError {
    fn from(e: WellbeingCliError) -> Self {
        match e {
            WellbeingCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            WellbeingCliError::Pipeline(PipelineError::InsufficientData(msg)) => CliError {
                code: "INSUFFICIENT_DATA".to_string(),
                message: msg,
                hint: Some("Collect more history before requesting a trend".to_string()),
            },
            WellbeingCliError::Pipeline(PipelineError::ConfigError(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'wellbeing doctor --config <file>' for details".to_string()),
            },
            WellbeingCliError::Pipeline(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            WellbeingCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            WellbeingCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            WellbeingCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'wellbeing schema input' for the expected layout".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
