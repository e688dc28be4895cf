//! Simulated gaze sources — development without estimation hardware and
//! scripted sequences for integration tests.
//!
//! Generators are fully deterministic: positions derive from the supplied
//! timestamps, never from wall clock or randomness, so a replayed run
//! produces identical pipeline output.

use std::collections::VecDeque;

use crate::pipeline::RawSample;

/// Built-in simulation patterns selectable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    /// Smooth horizontal sweep from screen center into the activation
    /// strip and back.
    Sweep,
    /// Fixation/saccade cycle stepping through the strip zones.
    Fixations,
}

impl SimMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::Fixations => "fixations",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sweep" => Some(Self::Sweep),
            "fixations" => Some(Self::Fixations),
            _ => None,
        }
    }
}

/// A source of raw samples, pulled by the session once per tick.
pub trait SampleProvider: Send {
    /// Next sample at the given session time, if the provider has one.
    fn next_sample(&mut self, now_ms: f64) -> Option<RawSample>;
}

/// Pattern generator over the viewport.
pub struct SimulatedGaze {
    mode: SimMode,
    width: f64,
    height: f64,
}

impl SimulatedGaze {
    pub fn new(mode: SimMode, width: f64, height: f64) -> Self {
        Self {
            mode,
            width,
            height,
        }
    }
}

impl SampleProvider for SimulatedGaze {
    fn next_sample(&mut self, now_ms: f64) -> Option<RawSample> {
        let t = now_ms / 1000.0;
        let (x, y) = match self.mode {
            SimMode::Sweep => {
                // Slow sine sweep: spends the crest inside the strip.
                let phase = (t * 0.25 * std::f64::consts::TAU).sin() * 0.5 + 0.5;
                (self.width * (0.3 + 0.7 * phase), self.height * 0.5)
            }
            SimMode::Fixations => {
                // Four-second cycle: 3 s fixating one zone, 1 s at center.
                let cycle = (t / 4.0).floor() as usize;
                let in_fixation = t % 4.0 < 3.0;
                if in_fixation {
                    let band = self.height / 5.0;
                    let zone = cycle % 5;
                    (
                        self.width - 60.0,
                        band * zone as f64 + band * 0.5,
                    )
                } else {
                    (self.width * 0.5, self.height * 0.5)
                }
            }
        };
        Some(RawSample {
            x,
            y,
            confidence: Some(0.95),
            t_ms: now_ms,
        })
    }
}

/// Pre-scripted sample sequence, delivered in order regardless of time.
/// The scripted timestamps are preserved so gate velocity math sees the
/// authored timing.
pub struct ScriptedGaze {
    samples: VecDeque<RawSample>,
}

impl ScriptedGaze {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self {
            samples: VecDeque::from(samples),
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl SampleProvider for ScriptedGaze {
    fn next_sample(&mut self, _now_ms: f64) -> Option<RawSample> {
        self.samples.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_roundtrip() {
        for m in [SimMode::Sweep, SimMode::Fixations] {
            assert_eq!(SimMode::from_str(m.as_str()), Some(m));
        }
        assert_eq!(SimMode::from_str("spiral"), None);
    }

    #[test]
    fn test_sweep_is_deterministic() {
        let mut a = SimulatedGaze::new(SimMode::Sweep, 1920.0, 1080.0);
        let mut b = SimulatedGaze::new(SimMode::Sweep, 1920.0, 1080.0);
        for i in 0..50 {
            let t = i as f64 * 33.0;
            assert_eq!(a.next_sample(t), b.next_sample(t));
        }
    }

    #[test]
    fn test_sweep_stays_on_screen() {
        let mut sim = SimulatedGaze::new(SimMode::Sweep, 1920.0, 1080.0);
        for i in 0..500 {
            let s = sim.next_sample(i as f64 * 33.0).unwrap();
            assert!(s.x >= 0.0 && s.x <= 1920.0);
            assert!(s.y >= 0.0 && s.y <= 1080.0);
        }
    }

    #[test]
    fn test_fixations_visit_the_strip() {
        let mut sim = SimulatedGaze::new(SimMode::Fixations, 1000.0, 800.0);
        // During the fixation window the x position sits inside a 140 px
        // strip at the right edge.
        let s = sim.next_sample(1000.0).unwrap();
        assert!(s.x >= 860.0);
    }

    #[test]
    fn test_scripted_preserves_authored_timing() {
        let script = vec![
            RawSample {
                x: 1.0,
                y: 2.0,
                confidence: None,
                t_ms: 10.0,
            },
            RawSample {
                x: 3.0,
                y: 4.0,
                confidence: Some(0.5),
                t_ms: 43.0,
            },
        ];
        let mut sg = ScriptedGaze::new(script.clone());
        assert_eq!(sg.remaining(), 2);
        assert_eq!(sg.next_sample(99_999.0), Some(script[0]));
        assert_eq!(sg.next_sample(99_999.0), Some(script[1]));
        assert_eq!(sg.next_sample(99_999.0), None);
    }
}
