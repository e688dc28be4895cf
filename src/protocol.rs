//! Wire protocol — JSON message types for both sockets plus frame codec.
//!
//! Upstream (gaze source) and downstream (UI clients) speak the same wire
//! format: a 4-byte big-endian length prefix followed by one UTF-8 JSON
//! message. Message shapes on the upstream side match the gaze server's
//! protocol field-for-field.

use serde::{Deserialize, Serialize};

use crate::pipeline::zones::ZoneCommand;
use crate::watchdog::TrackingStatus;

/// Maximum message payload size (1 MiB). Camera preview frames from the
/// upstream source are the largest legitimate payload.
pub const MAX_FRAME_SIZE: u32 = 1_048_576;

// ── Upstream messages ───────────────────────────────────────

/// Messages received from the gaze-estimation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamMessage {
    /// One raw gaze sample.
    Gaze {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        /// Upstream wall-clock stamp; kept for tracing only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    /// Echo of calibration progress on the estimator side.
    CalibrationAck {
        points_collected: u32,
        is_calibrated: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },
    /// The estimator discarded its fitted calibration.
    CalibrationReset,
    /// Base64 camera preview frame. Tolerated and ignored.
    Frame { data: String },
    /// Forward-compatibility: unknown message types are skipped, not fatal.
    #[serde(other)]
    Unknown,
}

/// Commands sent to the gaze-estimation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamCommand {
    ScreenSize {
        width: f64,
        height: f64,
    },
    StartTracking,
    StopTracking,
    /// Ground-truth screen coordinate for one confirmed calibration click.
    CalibrationPoint {
        screen_x: f64,
        screen_y: f64,
    },
    ResetCalibration,
    AdjustSensitivity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
    },
}

// ── UI messages ─────────────────────────────────────────────

/// Requests accepted from UI clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiRequest {
    Hello,
    Status,
    /// The UI layer's viewport changed; resets the pipeline.
    Viewport { width: f64, height: f64 },
    /// One confirmation click on the current calibration target.
    CalibrationClick { x: f64, y: f64 },
    SkipCalibration,
    ResetCalibration,
    /// Resume tracking after the kill switch paused the session.
    Resume,
}

/// Events and responses sent to UI clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// Filtered gaze position, for cursor rendering.
    Gaze { x: f64, y: f64 },
    /// Committed zone changed (`command` absent means the strip was left).
    Zone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<ZoneCommand>,
    },
    /// Dwell progress toward activation, in [0, 1].
    Dwell {
        zone: usize,
        command: ZoneCommand,
        progress: f64,
    },
    /// Dwell threshold reached; the command fires.
    Activate {
        zone: usize,
        command: ZoneCommand,
        progress: f64,
    },
    /// A continuous action tied to a zone must stop.
    Cancel { zone: usize, command: ZoneCommand },
    /// Calibration protocol progress.
    Calibration {
        targets_confirmed: u32,
        clicks_on_current_target: u32,
        done: bool,
    },
    /// Liveness / connection status changed.
    TrackingStatus { status: TrackingStatus },
    /// Request acknowledged.
    Ok,
    /// Request failed.
    Error { reason: String },
}

// ── Frame codec ─────────────────────────────────────────────

/// Frame-level protocol violation. Drops the offending connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTooLarge {
    pub len: u32,
}

/// Append one framed payload (length prefix + bytes) to `out`.
pub fn encode_frame(payload: &str, out: &mut Vec<u8>) {
    let bytes = payload.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Incremental decoder over a byte stream of framed messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
        }
    }

    /// Feed raw bytes read from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract all complete payloads buffered so far.
    pub fn drain_frames(&mut self) -> Result<Vec<String>, FrameTooLarge> {
        let mut messages = Vec::new();
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if len > MAX_FRAME_SIZE {
                self.buf.clear();
                return Err(FrameTooLarge { len });
            }
            let total = 4 + len as usize;
            if self.buf.len() < total {
                break; // incomplete frame, wait for more data
            }
            let payload = String::from_utf8_lossy(&self.buf[4..total]).to_string();
            self.buf.drain(..total);
            messages.push(payload);
        }
        Ok(messages)
    }

    /// Discard any partially buffered frame (connection reset).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
