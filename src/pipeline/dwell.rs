//! Dwell timing — sustained occupancy of a committed zone fires its
//! activation, then re-arms so a held gaze re-triggers at the dwell
//! interval. Progress is reported on every evaluation for UI feedback,
//! not only at the firing edge.

use tracing::debug;

/// Dwell machine state. No terminal state; it runs for the pipeline's life.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DwellState {
    /// No committed zone.
    Idle,
    /// Accumulating dwell in a committed zone.
    Tracking { zone: usize, dwell_start: f64 },
}

/// Outcome of one dwell evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DwellOutcome {
    Idle,
    /// Still accumulating; `fraction` is `min(elapsed / dwell, 1)`.
    Progress { zone: usize, fraction: f64 },
    /// Threshold reached. The timer has re-armed at the firing instant.
    Fired { zone: usize },
}

#[derive(Debug)]
pub struct DwellTimer {
    dwell_ms: f64,
    state: DwellState,
}

impl DwellTimer {
    pub fn new(dwell_ms: f64) -> Self {
        Self {
            dwell_ms,
            state: DwellState::Idle,
        }
    }

    /// Start (or restart) tracking a zone, discarding prior progress.
    pub fn begin(&mut self, zone: usize, now_ms: f64) {
        self.state = DwellState::Tracking {
            zone,
            dwell_start: now_ms,
        };
    }

    /// Drop back to idle, discarding prior progress.
    pub fn clear(&mut self) {
        self.state = DwellState::Idle;
    }

    pub fn zone(&self) -> Option<usize> {
        match self.state {
            DwellState::Tracking { zone, .. } => Some(zone),
            DwellState::Idle => None,
        }
    }

    /// Evaluate at `now_ms`. Fires at most once per call; on fire the timer
    /// re-arms so continued occupancy re-triggers one dwell interval later.
    pub fn evaluate(&mut self, now_ms: f64) -> DwellOutcome {
        match self.state {
            DwellState::Idle => DwellOutcome::Idle,
            DwellState::Tracking { zone, dwell_start } => {
                let elapsed = now_ms - dwell_start;
                if elapsed >= self.dwell_ms {
                    debug!(zone, elapsed, "dwell threshold reached");
                    self.state = DwellState::Tracking {
                        zone,
                        dwell_start: now_ms,
                    };
                    DwellOutcome::Fired { zone }
                } else {
                    DwellOutcome::Progress {
                        zone,
                        fraction: (elapsed / self.dwell_ms).clamp(0.0, 1.0),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_until_begun() {
        let mut d = DwellTimer::new(600.0);
        assert_eq!(d.evaluate(100.0), DwellOutcome::Idle);
        assert_eq!(d.zone(), None);
    }

    #[test]
    fn test_progress_before_threshold() {
        let mut d = DwellTimer::new(600.0);
        d.begin(3, 0.0);
        match d.evaluate(300.0) {
            DwellOutcome::Progress { zone, fraction } => {
                assert_eq!(zone, 3);
                assert!((fraction - 0.5).abs() < 1e-9);
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[test]
    fn test_fires_exactly_at_threshold() {
        let mut d = DwellTimer::new(600.0);
        d.begin(3, 0.0);
        assert_eq!(d.evaluate(599.9), DwellOutcome::Progress { zone: 3, fraction: 599.9 / 600.0 });
        assert_eq!(d.evaluate(600.0), DwellOutcome::Fired { zone: 3 });
    }

    #[test]
    fn test_refires_on_continued_occupancy() {
        let mut d = DwellTimer::new(600.0);
        d.begin(1, 0.0);
        let mut fired = 0;
        let mut t = 0.0;
        while t <= 1200.0 {
            if matches!(d.evaluate(t), DwellOutcome::Fired { .. }) {
                fired += 1;
            }
            t += 16.0;
        }
        assert_eq!(fired, 2, "held for 2x dwell must fire exactly twice");
    }

    #[test]
    fn test_exact_duration_fires_once() {
        let mut d = DwellTimer::new(600.0);
        d.begin(2, 0.0);
        let mut fired = 0;
        for t in (0..=600).step_by(10) {
            if matches!(d.evaluate(t as f64), DwellOutcome::Fired { .. }) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_begin_discards_progress() {
        let mut d = DwellTimer::new(600.0);
        d.begin(0, 0.0);
        d.evaluate(500.0);
        // Switching zones restarts the accumulator.
        d.begin(1, 500.0);
        match d.evaluate(600.0) {
            DwellOutcome::Progress { zone, fraction } => {
                assert_eq!(zone, 1);
                assert!(fraction < 0.2);
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_goes_idle() {
        let mut d = DwellTimer::new(600.0);
        d.begin(4, 0.0);
        d.clear();
        assert_eq!(d.evaluate(10_000.0), DwellOutcome::Idle);
    }
}
