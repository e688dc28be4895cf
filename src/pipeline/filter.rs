//! Adaptive smoothing — per-axis Kalman filter with two fallbacks.
//!
//! The Kalman form is the degenerate one-state case: no dynamics beyond
//! identity, so prediction only inflates the error covariance. It adapts
//! its gain automatically, which is what makes it the default over the
//! fixed-window alternatives.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::{PipelineConfig, SmoothingStrategy};
use crate::pipeline::gate::Point;

// ── Scalar Kalman ───────────────────────────────────────────

/// One-dimensional Kalman filter over a single coordinate axis.
#[derive(Debug, Clone)]
pub struct AxisKalman {
    estimate: Option<f64>,
    /// Error covariance.
    p: f64,
    /// Process noise.
    q: f64,
    /// Measurement noise.
    r: f64,
}

impl AxisKalman {
    pub fn new(q: f64, r: f64) -> Self {
        Self {
            estimate: None,
            p: 1.0,
            q,
            r,
        }
    }

    /// Predict-update cycle for one measurement.
    pub fn update(&mut self, measurement: f64) -> f64 {
        let estimate = match self.estimate {
            Some(e) => e,
            None => {
                // Seed on the first measurement rather than filtering
                // toward an arbitrary origin.
                self.estimate = Some(measurement);
                return measurement;
            }
        };

        // Predict: identity model, covariance grows by process noise.
        let p_pred = self.p + self.q;

        // Update: innovation weighted by the adaptive gain.
        let k = p_pred / (p_pred + self.r);
        let next = estimate + k * (measurement - estimate);
        self.estimate = Some(next);
        self.p = (1.0 - k) * p_pred;
        next
    }

    pub fn reset(&mut self) {
        self.estimate = None;
        self.p = 1.0;
    }
}

// ── Exponential low-pass ────────────────────────────────────

/// Fixed-gain exponential smoothing, the fallback when Kalman is disabled.
#[derive(Debug, Clone)]
pub struct AxisLowpass {
    estimate: Option<f64>,
    alpha: f64,
}

impl AxisLowpass {
    pub fn new(alpha: f64) -> Self {
        Self {
            estimate: None,
            alpha,
        }
    }

    pub fn update(&mut self, measurement: f64) -> f64 {
        let next = match self.estimate {
            Some(e) => e + self.alpha * (measurement - e),
            None => measurement,
        };
        self.estimate = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.estimate = None;
    }
}

// ── Weighted moving average ─────────────────────────────────

/// Bounded window over recent accepted samples; sample `i` of `m` carries
/// weight `(i + 1) / m`, most recent highest.
#[derive(Debug, Clone)]
pub struct WeightedWindow {
    window: VecDeque<Point>,
    capacity: usize,
}

impl WeightedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn update(&mut self, p: Point) -> Point {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(p);

        let m = self.window.len() as f64;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_w = 0.0;
        for (i, sample) in self.window.iter().enumerate() {
            let w = (i as f64 + 1.0) / m;
            sum_x += sample.x * w;
            sum_y += sample.y * w;
            sum_w += w;
        }
        Point::new(sum_x / sum_w, sum_y / sum_w)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

// ── Adaptive filter ─────────────────────────────────────────

/// Two-axis smoothing stage. Exactly one strategy is active; switching
/// strategies mid-session resets all filter state (behavior on a warm
/// switch is otherwise undefined).
#[derive(Debug)]
pub struct AdaptiveFilter {
    strategy: SmoothingStrategy,
    kalman_x: AxisKalman,
    kalman_y: AxisKalman,
    lowpass_x: AxisLowpass,
    lowpass_y: AxisLowpass,
    window: WeightedWindow,
    last_output: Option<Point>,
}

impl AdaptiveFilter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            strategy: config.smoothing,
            kalman_x: AxisKalman::new(config.process_noise, config.measurement_noise),
            kalman_y: AxisKalman::new(config.process_noise, config.measurement_noise),
            lowpass_x: AxisLowpass::new(config.lowpass_alpha),
            lowpass_y: AxisLowpass::new(config.lowpass_alpha),
            window: WeightedWindow::new(config.average_window),
            last_output: None,
        }
    }

    /// Smooth one accepted sample. The result is the displayed position and
    /// the zone resolver's input.
    pub fn update(&mut self, p: Point) -> Point {
        let out = match self.strategy {
            SmoothingStrategy::Kalman => Point::new(
                self.kalman_x.update(p.x),
                self.kalman_y.update(p.y),
            ),
            SmoothingStrategy::Lowpass => Point::new(
                self.lowpass_x.update(p.x),
                self.lowpass_y.update(p.y),
            ),
            SmoothingStrategy::WeightedAverage => self.window.update(p),
        };
        self.last_output = Some(out);
        out
    }

    /// Most recent filtered position, if any sample has been accepted.
    pub fn last_output(&self) -> Option<Point> {
        self.last_output
    }

    pub fn strategy(&self) -> SmoothingStrategy {
        self.strategy
    }

    /// Change the smoothing strategy. Always a full reset.
    pub fn set_strategy(&mut self, strategy: SmoothingStrategy) {
        if strategy != self.strategy {
            debug!(from = self.strategy.as_str(), to = strategy.as_str(), "smoothing strategy change");
        }
        self.strategy = strategy;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.kalman_x.reset();
        self.kalman_y.reset();
        self.lowpass_x.reset();
        self.lowpass_y.reset();
        self.window.reset();
        self.last_output = None;
    }
}
