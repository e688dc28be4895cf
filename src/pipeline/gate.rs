//! Outlier and saccade gate — first line of defense against bad samples.
//!
//! Applies three vetoes in order (first one wins): low estimator
//! confidence, saccade-speed movement, and distance outliers. Outliers get
//! a hold-steady replacement so the displayed cursor does not vanish during
//! a single-frame glitch. Velocity bookkeeping continues across rejections
//! so the speed estimate never has gaps.

use tracing::trace;

/// A 2D position in normalized viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Why a sample was rejected, with any replacement to display instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateVerdict {
    Accepted,
    /// Estimator confidence below the floor.
    LowConfidence,
    /// Instantaneous speed above the saccade threshold; data unreliable.
    Saccade { speed: f64 },
    /// Too far from the prior filtered position. `hold` repeats that
    /// position so the cursor stays put through the glitch.
    Outlier { hold: Option<Point> },
}

impl GateVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Position to display when the sample itself is unusable.
    pub fn replacement(&self) -> Option<Point> {
        match self {
            Self::Outlier { hold } => *hold,
            _ => None,
        }
    }
}

/// Sample gate with velocity tracking.
#[derive(Debug)]
pub struct SampleGate {
    min_confidence: f64,
    velocity_threshold: f64,
    outlier_threshold: f64,
    /// Last observed (normalized) position, accepted or not.
    prior: Option<Point>,
    /// Timestamp of `prior` in session milliseconds.
    prior_t_ms: f64,
    /// Last computed speed (px/s), reused when elapsed time is degenerate.
    last_speed: f64,
}

impl SampleGate {
    pub fn new(min_confidence: f64, velocity_threshold: f64, outlier_threshold: f64) -> Self {
        Self {
            min_confidence,
            velocity_threshold,
            outlier_threshold,
            prior: None,
            prior_t_ms: 0.0,
            last_speed: 0.0,
        }
    }

    /// Evaluate one normalized sample against the prior filtered position.
    ///
    /// Always updates the velocity-tracking fields, even on rejection, so
    /// speed estimation stays continuous across gaps.
    pub fn evaluate(
        &mut self,
        pos: Point,
        confidence: Option<f64>,
        t_ms: f64,
        prior_filtered: Option<Point>,
    ) -> GateVerdict {
        let speed = self.measure_speed(pos, t_ms);
        self.prior = Some(pos);
        self.prior_t_ms = t_ms;
        self.last_speed = speed;

        if let Some(c) = confidence {
            if c < self.min_confidence {
                trace!(confidence = c, "sample below confidence floor");
                return GateVerdict::LowConfidence;
            }
        }

        if speed > self.velocity_threshold {
            trace!(speed, "saccade-speed movement rejected");
            return GateVerdict::Saccade { speed };
        }

        if let Some(filtered) = prior_filtered {
            if pos.distance_to(filtered) > self.outlier_threshold {
                trace!(
                    distance = pos.distance_to(filtered),
                    "outlier held at prior filtered position"
                );
                return GateVerdict::Outlier {
                    hold: Some(filtered),
                };
            }
        }

        GateVerdict::Accepted
    }

    /// Instantaneous speed in px/s against the prior sample. A non-positive
    /// elapsed time (duplicate or reordered stamps) reuses the last speed.
    fn measure_speed(&self, pos: Point, t_ms: f64) -> f64 {
        let prior = match self.prior {
            Some(p) => p,
            None => return 0.0,
        };
        let elapsed_s = (t_ms - self.prior_t_ms) / 1000.0;
        if elapsed_s <= 0.0 {
            return self.last_speed;
        }
        pos.distance_to(prior) / elapsed_s
    }

    /// Forget all history (viewport resize, watchdog recovery).
    pub fn reset(&mut self) {
        self.prior = None;
        self.prior_t_ms = 0.0;
        self.last_speed = 0.0;
    }
}
