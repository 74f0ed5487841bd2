//! Session worker thread
//!
//! [`SessionHandle`] runs one [`SessionProcessor`] on its own thread and feeds
//! it through a single-consumer channel, so frames, snapshot requests and
//! control commands are applied strictly in arrival order. Sessions never
//! share state; each handle owns its worker.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::session::{FrameOutput, SessionProcessor};
use crate::types::{CalibrationStatus, FeatureRecord, WindowSnapshot};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Commands queued ahead of the worker before senders block
const COMMAND_CAPACITY: usize = 256;

enum SessionCommand {
    Frame {
        ts_ms: i64,
        record: Box<FeatureRecord>,
        reply: Sender<FrameOutput>,
    },
    Snapshot {
        reply: Sender<Option<WindowSnapshot>>,
    },
    SetDetection(bool),
    Calibration {
        reply: Sender<CalibrationStatus>,
    },
    Shutdown,
}

/// Handle to a session running on a dedicated thread
pub struct SessionHandle {
    tx: Sender<SessionCommand>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start a worker owning a fresh session built from `config`
    pub fn spawn(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::spawn_with(SessionProcessor::from_config(config))
    }

    /// Start a worker owning an existing session (e.g. with restored calibration)
    pub fn spawn_with(session: SessionProcessor) -> Result<Self, PipelineError> {
        let (tx, rx) = bounded(COMMAND_CAPACITY);
        let worker = thread::Builder::new()
            .name("wellbeing-session".to_string())
            .spawn(move || run(session, rx))?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    /// Process one frame and wait for its output
    pub fn process(&self, ts_ms: i64, record: FeatureRecord) -> Result<FrameOutput, PipelineError> {
        let (reply, response) = bounded(1);
        self.send(SessionCommand::Frame {
            ts_ms,
            record: Box::new(record),
            reply,
        })?;
        response.recv().map_err(|_| PipelineError::SessionClosed)
    }

    /// Current window aggregates, ordered after every frame sent before it
    pub fn snapshot(&self) -> Result<Option<WindowSnapshot>, PipelineError> {
        let (reply, response) = bounded(1);
        self.send(SessionCommand::Snapshot { reply })?;
        response.recv().map_err(|_| PipelineError::SessionClosed)
    }

    pub fn set_detection(&self, enabled: bool) -> Result<(), PipelineError> {
        self.send(SessionCommand::SetDetection(enabled))
    }

    pub fn calibration(&self) -> Result<CalibrationStatus, PipelineError> {
        let (reply, response) = bounded(1);
        self.send(SessionCommand::Calibration { reply })?;
        response.recv().map_err(|_| PipelineError::SessionClosed)
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: SessionCommand) -> Result<(), PipelineError> {
        self.tx
            .send(command)
            .map_err(|_| PipelineError::SessionClosed)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(SessionCommand::Shutdown);
            if worker.join().is_err() {
                tracing::warn!("session worker panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut session: SessionProcessor, rx: Receiver<SessionCommand>) {
    tracing::debug!("session worker started");
    // a closed channel means every handle is gone
    while let Ok(command) = rx.recv() {
        match command {
            SessionCommand::Frame {
                ts_ms,
                record,
                reply,
            } => {
                let _ = reply.send(session.process(ts_ms, *record));
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(session.snapshot());
            }
            SessionCommand::SetDetection(enabled) => session.set_detection(enabled),
            SessionCommand::Calibration { reply } => {
                let _ = reply.send(session.calibration_status());
            }
            SessionCommand::Shutdown => break,
        }
    }
    tracing::debug!(
        blinks = session.cumulative().blink_count,
        yawns = session.cumulative().yawn_count,
        "session worker stopped"
    );
}
