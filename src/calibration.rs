//! Calibration gate — blocks activation until the calibration protocol
//! completes or is explicitly skipped.
//!
//! The protocol collects a fixed number of on-screen targets, each needing
//! repeated confirmation clicks. Only the final "done" bit outlives the
//! session; it is persisted through a `CalibrationStore` so later sessions
//! short-circuit straight past the protocol.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CalibrationConfig;

// ── Persistence ─────────────────────────────────────────────

/// Storage seam for the persisted completion flag.
pub trait CalibrationStore: Send {
    fn load(&self) -> bool;
    fn save(&self, done: bool) -> io::Result<()>;
}

/// On-disk JSON flag file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedCalibration {
    calibrated: bool,
}

/// File-backed store at a fixed path, created on first save.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CalibrationStore for FileStore {
    fn load(&self) -> bool {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return false;
        };
        match serde_json::from_str::<PersistedCalibration>(&raw) {
            Ok(state) => state.calibrated,
            Err(e) => {
                warn!(path = %self.path.display(), "unreadable calibration state: {}", e);
                false
            }
        }
    }

    fn save(&self, done: bool) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string(&PersistedCalibration { calibrated: done })
            .expect("flag struct always serializes");
        fs::write(&self.path, body)
    }
}

// ── Gate state machine ──────────────────────────────────────

/// Calibration lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    NotStarted,
    Collecting,
    Done,
}

impl CalibrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Collecting => "collecting",
            Self::Done => "done",
        }
    }
}

/// Session-local progress snapshot, suitable for UI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationProgress {
    pub targets_confirmed: u32,
    pub clicks_on_current_target: u32,
    pub done: bool,
}

/// The gate itself. While not `Done`, activation commands are suppressed
/// (the session wires this to `Pipeline::set_commands_enabled`).
pub struct CalibrationGate {
    config: CalibrationConfig,
    phase: CalibrationPhase,
    targets_confirmed: u32,
    clicks_on_current: u32,
    store: Box<dyn CalibrationStore>,
}

impl CalibrationGate {
    /// Build the gate, short-circuiting to `Done` if a previous session
    /// persisted completion.
    pub fn new(config: CalibrationConfig, store: Box<dyn CalibrationStore>) -> Self {
        let phase = if store.load() {
            info!("calibration already complete, gate open");
            CalibrationPhase::Done
        } else {
            CalibrationPhase::NotStarted
        };
        Self {
            config,
            phase,
            targets_confirmed: 0,
            clicks_on_current: 0,
            store,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == CalibrationPhase::Done
    }

    pub fn progress(&self) -> CalibrationProgress {
        CalibrationProgress {
            targets_confirmed: self.targets_confirmed,
            clicks_on_current_target: self.clicks_on_current,
            done: self.is_done(),
        }
    }

    /// Register one confirmation click on the current target. The caller
    /// forwards the clicked coordinate upstream as ground truth. Returns
    /// the updated progress; `done` flips when the final target confirms.
    pub fn click(&mut self) -> CalibrationProgress {
        match self.phase {
            CalibrationPhase::Done => {}
            CalibrationPhase::NotStarted | CalibrationPhase::Collecting => {
                self.phase = CalibrationPhase::Collecting;
                self.clicks_on_current += 1;
                if self.clicks_on_current >= self.config.clicks_per_point {
                    self.targets_confirmed += 1;
                    self.clicks_on_current = 0;
                    info!(
                        confirmed = self.targets_confirmed,
                        total = self.config.points,
                        "calibration target confirmed"
                    );
                    if self.targets_confirmed >= self.config.points {
                        self.complete();
                    }
                }
            }
        }
        self.progress()
    }

    /// The estimator reported itself calibrated; trust it and open the gate.
    pub fn force_done(&mut self) {
        if !self.is_done() {
            info!("upstream reports calibrated, gate forced open");
            self.complete();
        }
    }

    /// Skip the protocol entirely.
    pub fn skip(&mut self) {
        if !self.is_done() {
            info!("calibration skipped");
            self.complete();
        }
    }

    /// Drop back to `NotStarted` and clear the persisted flag. The caller
    /// also instructs the estimator to discard its fitted model.
    pub fn reset(&mut self) {
        info!("calibration reset");
        self.phase = CalibrationPhase::NotStarted;
        self.targets_confirmed = 0;
        self.clicks_on_current = 0;
        if let Err(e) = self.store.save(false) {
            warn!("failed to clear persisted calibration: {}", e);
        }
    }

    fn complete(&mut self) {
        self.phase = CalibrationPhase::Done;
        if let Err(e) = self.store.save(true) {
            warn!("failed to persist calibration: {}", e);
        }
    }
}
