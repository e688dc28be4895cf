//! Liveness watchdog — detects a frozen sample stream and requests
//! recovery from the upstream source.
//!
//! Runs on its own fixed-interval timer, independent of sample arrival.
//! A freeze is reported exactly once: the `recovering` latch stays set
//! until a fresh sample proves the stream is alive again, so repeated
//! check intervals over one dead stream do not stack recovery attempts.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Observable session status, broadcast to UI clients on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    /// No upstream connection yet (or reconnecting).
    Disconnected,
    /// Connected, samples flowing.
    Live,
    /// Stream frozen; recovery in progress.
    Stalled,
    /// Kill switch engaged; tracking stopped until resume.
    Paused,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Live => "live",
            Self::Stalled => "stalled",
            Self::Paused => "paused",
        }
    }
}

/// Recovery path chosen when a freeze is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Pause/resume cycle: stop tracking, then restart after a bounded
    /// delay. Used while the upstream link is up.
    SoftRestart,
    /// Drop and re-establish the upstream connection.
    Reinitialize,
}

/// Watchdog state over the sample stream.
#[derive(Debug)]
pub struct LivenessWatchdog {
    timeout_ms: f64,
    last_sample_at: Option<f64>,
    recovering: bool,
}

impl LivenessWatchdog {
    pub fn new(timeout_ms: f64) -> Self {
        Self {
            timeout_ms,
            last_sample_at: None,
            recovering: false,
        }
    }

    /// Record sample arrival. Clears any in-progress recovery latch.
    pub fn note_sample(&mut self, now_ms: f64) {
        self.last_sample_at = Some(now_ms);
        self.recovering = false;
    }

    pub fn last_sample_at(&self) -> Option<f64> {
        self.last_sample_at
    }

    pub fn recovering(&self) -> bool {
        self.recovering
    }

    /// Periodic check. Returns true exactly once per detected freeze.
    /// Inert until calibration is done and a first sample has arrived.
    pub fn check(&mut self, now_ms: f64, calibration_done: bool) -> bool {
        if !calibration_done || self.recovering {
            return false;
        }
        let last = match self.last_sample_at {
            Some(t) => t,
            None => return false,
        };
        let silence = now_ms - last;
        if silence > self.timeout_ms {
            warn!(silence_ms = silence, "gaze stream frozen");
            self.recovering = true;
            return true;
        }
        false
    }

    /// Forget stream history (reconnect, explicit reset).
    pub fn reset(&mut self) {
        self.last_sample_at = None;
        self.recovering = false;
    }
}
