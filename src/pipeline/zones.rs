//! Zone resolution — activation strip membership, zone indexing, and the
//! hysteresis arbiter that debounces boundary flicker.
//!
//! Zone boundaries are derived from the viewport at every call so a resize
//! takes effect immediately; nothing about the geometry is cached.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Viewport;
use crate::pipeline::gate::Point;

// ── Commands ────────────────────────────────────────────────

/// Action bound to a zone, top to bottom in the default layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneCommand {
    ScrollUp,
    ScrollDown,
    MediaToggle,
    Assistant,
    KillSwitch,
}

impl ZoneCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScrollUp => "scroll_up",
            Self::ScrollDown => "scroll_down",
            Self::MediaToggle => "media_toggle",
            Self::Assistant => "assistant",
            Self::KillSwitch => "kill_switch",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scroll_up" => Some(Self::ScrollUp),
            "scroll_down" => Some(Self::ScrollDown),
            "media_toggle" => Some(Self::MediaToggle),
            "assistant" => Some(Self::Assistant),
            "kill_switch" => Some(Self::KillSwitch),
            _ => None,
        }
    }

    /// Scroll commands run continuously while their zone is held and must
    /// be cancelled when the zone is exited.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::ScrollUp | Self::ScrollDown)
    }

    /// The default five-zone sidebar layout.
    pub fn sidebar_layout() -> Vec<ZoneCommand> {
        vec![
            Self::ScrollUp,
            Self::ScrollDown,
            Self::MediaToggle,
            Self::Assistant,
            Self::KillSwitch,
        ]
    }
}

// ── Geometric resolution ────────────────────────────────────

/// Maps a filtered position to a zone index inside the activation strip.
#[derive(Debug, Clone)]
pub struct ZoneResolver {
    strip_width: f64,
    zone_count: usize,
}

impl ZoneResolver {
    pub fn new(strip_width: f64, zone_count: usize) -> Self {
        Self {
            strip_width,
            zone_count,
        }
    }

    /// Zone index for a position, or `None` outside the activation strip.
    pub fn resolve(&self, pos: Point, viewport: Viewport) -> Option<usize> {
        if pos.x < viewport.width - self.strip_width {
            return None;
        }
        let band = viewport.height / self.zone_count as f64;
        let index = (pos.y / band).floor() as isize;
        Some(index.clamp(0, self.zone_count as isize - 1) as usize)
    }
}

// ── Hysteresis arbiter ──────────────────────────────────────

/// Outcome of feeding one resolved zone observation to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneTransition {
    /// No change committed this observation.
    None,
    /// Entered the strip from outside; commits immediately (there is no
    /// in-progress dwell or action to protect).
    Entered { zone: usize },
    /// A candidate zone stayed stable past the switch delay.
    Switched { from: usize, to: usize },
    /// Left the strip; clears immediately.
    Exited { from: usize },
}

/// Debounces raw zone changes: a differing candidate must be re-observed
/// continuously for the switch delay before it commits. Flicker back to the
/// current zone clears the candidate.
#[derive(Debug)]
pub struct ZoneArbiter {
    delay_ms: f64,
    current: Option<usize>,
    pending: Option<usize>,
    pending_since: f64,
}

impl ZoneArbiter {
    pub fn new(delay_ms: f64) -> Self {
        Self {
            delay_ms,
            current: None,
            pending: None,
            pending_since: 0.0,
        }
    }

    /// Zone currently committed, if inside the strip.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Feed one resolved observation and report any committed transition.
    pub fn observe(&mut self, resolved: Option<usize>, now_ms: f64) -> ZoneTransition {
        match (self.current, resolved) {
            (None, None) => ZoneTransition::None,
            (Some(from), None) => {
                self.current = None;
                self.pending = None;
                debug!(from, "left activation strip");
                ZoneTransition::Exited { from }
            }
            (None, Some(zone)) => {
                self.current = Some(zone);
                self.pending = None;
                debug!(zone, "entered activation strip");
                ZoneTransition::Entered { zone }
            }
            (Some(current), Some(zone)) if zone == current => {
                // Debounce satisfied: the flicker never stabilized.
                self.pending = None;
                ZoneTransition::None
            }
            (Some(current), Some(zone)) => {
                if self.pending != Some(zone) {
                    self.pending = Some(zone);
                    self.pending_since = now_ms;
                    ZoneTransition::None
                } else if now_ms - self.pending_since >= self.delay_ms {
                    self.current = Some(zone);
                    self.pending = None;
                    debug!(from = current, to = zone, "zone switch committed");
                    ZoneTransition::Switched {
                        from: current,
                        to: zone,
                    }
                } else {
                    ZoneTransition::None
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.pending = None;
        self.pending_since = 0.0;
    }
}
