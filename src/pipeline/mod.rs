//! The signal-conditioning pipeline — one explicit context object owning
//! every per-session mutable stage, driven by samples and timer ticks.
//!
//! Data flow per sample: normalize → gate → filter → zone arbiter → dwell.
//! Ticks re-evaluate the zone and dwell machinery between samples so
//! hysteresis and dwell clocks advance smoothly at irregular sample rates.

pub mod dwell;
pub mod filter;
pub mod gate;
pub mod normalize;
pub mod zones;

use tracing::info;

use crate::config::{ConfigError, PipelineConfig, SmoothingStrategy, Viewport};
use dwell::{DwellOutcome, DwellTimer};
use filter::AdaptiveFilter;
use gate::{Point, SampleGate};
use zones::{ZoneArbiter, ZoneCommand, ZoneResolver, ZoneTransition};

/// One raw reading from the upstream gaze source, stamped on arrival with
/// the session clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub x: f64,
    pub y: f64,
    pub confidence: Option<f64>,
    pub t_ms: f64,
}

/// Events produced by one pipeline step, in emission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineEvent {
    /// The displayed gaze position moved (filtered, or held steady).
    GazeMoved { x: f64, y: f64 },
    /// A zone became current (strip entry or committed switch).
    ZoneEntered { zone: usize, command: ZoneCommand },
    /// The strip was exited; no zone is current.
    ZoneCleared { from: usize, command: ZoneCommand },
    /// Dwell accumulating toward activation.
    DwellProgress {
        zone: usize,
        command: ZoneCommand,
        fraction: f64,
    },
    /// Dwell threshold reached; the zone's command fires.
    Activated { zone: usize, command: ZoneCommand },
    /// A continuous action (scrolling) tied to a zone must stop.
    ActionCancelled { zone: usize, command: ZoneCommand },
}

/// The pipeline context. All mutable signal state lives here; `reset`
/// replaces every stage wholesale rather than nulling fields piecemeal.
pub struct Pipeline {
    config: PipelineConfig,
    viewport: Viewport,
    gate: SampleGate,
    filter: AdaptiveFilter,
    resolver: ZoneResolver,
    arbiter: ZoneArbiter,
    dwell: DwellTimer,
    /// While false (calibration pending, session paused) the zone/dwell
    /// stages are bypassed; filtering still runs for live preview.
    commands_enabled: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, viewport: Viewport) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = SampleGate::new(
            config.min_confidence,
            config.velocity_threshold,
            config.outlier_threshold,
        );
        let filter = AdaptiveFilter::new(&config);
        let resolver = ZoneResolver::new(config.strip_width, config.zone_count());
        let arbiter = ZoneArbiter::new(config.zone_switch_delay_ms);
        let dwell = DwellTimer::new(config.dwell_ms);
        Ok(Self {
            config,
            viewport,
            gate,
            filter,
            resolver,
            arbiter,
            dwell,
            commands_enabled: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Zone currently committed, if any.
    pub fn current_zone(&self) -> Option<usize> {
        self.arbiter.current()
    }

    /// Most recent displayed position.
    pub fn display_position(&self) -> Option<Point> {
        self.filter.last_output()
    }

    pub fn commands_enabled(&self) -> bool {
        self.commands_enabled
    }

    /// Command bound to a zone index.
    pub fn command_for(&self, zone: usize) -> ZoneCommand {
        self.config.zone_commands[zone]
    }

    /// Enable or suppress the zone/dwell stages. Disabling clears any
    /// in-progress zone and cancels continuous actions.
    pub fn set_commands_enabled(&mut self, enabled: bool) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        if self.commands_enabled && !enabled {
            if let Some(zone) = self.arbiter.current() {
                let command = self.command_for(zone);
                if command.is_continuous() {
                    events.push(PipelineEvent::ActionCancelled { zone, command });
                }
                events.push(PipelineEvent::ZoneCleared {
                    from: zone,
                    command,
                });
            }
            self.arbiter.reset();
            self.dwell.clear();
        }
        self.commands_enabled = enabled;
        events
    }

    /// Process one raw sample through every stage.
    pub fn process_sample(&mut self, sample: RawSample) -> Vec<PipelineEvent> {
        let mut events = Vec::new();

        let (nx, ny) = normalize::normalize_point(
            sample.x,
            sample.y,
            self.viewport.width,
            self.viewport.height,
            self.config.edge_margin,
        );
        let pos = Point::new(nx, ny);

        let verdict = self
            .gate
            .evaluate(pos, sample.confidence, sample.t_ms, self.filter.last_output());

        let display = if verdict.is_accepted() {
            Some(self.filter.update(pos))
        } else {
            // Hold-steady replacement keeps the cursor from vanishing
            // through a glitch; other rejections leave it untouched.
            verdict.replacement()
        };

        if let Some(p) = display {
            events.push(PipelineEvent::GazeMoved { x: p.x, y: p.y });
            if self.commands_enabled {
                self.advance_zones(p, sample.t_ms, &mut events);
            }
        }

        events
    }

    /// Periodic re-evaluation between samples: advances hysteresis and
    /// dwell clocks against the last displayed position.
    pub fn tick(&mut self, now_ms: f64) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        if !self.commands_enabled {
            return events;
        }
        if let Some(p) = self.filter.last_output() {
            self.advance_zones(p, now_ms, &mut events);
        }
        events
    }

    fn advance_zones(&mut self, pos: Point, now_ms: f64, events: &mut Vec<PipelineEvent>) {
        let resolved = self.resolver.resolve(pos, self.viewport);
        match self.arbiter.observe(resolved, now_ms) {
            ZoneTransition::None => {}
            ZoneTransition::Entered { zone } => {
                self.dwell.begin(zone, now_ms);
                events.push(PipelineEvent::ZoneEntered {
                    zone,
                    command: self.command_for(zone),
                });
            }
            ZoneTransition::Switched { from, to } => {
                let from_command = self.command_for(from);
                if from_command.is_continuous() {
                    events.push(PipelineEvent::ActionCancelled {
                        zone: from,
                        command: from_command,
                    });
                }
                self.dwell.begin(to, now_ms);
                events.push(PipelineEvent::ZoneEntered {
                    zone: to,
                    command: self.command_for(to),
                });
            }
            ZoneTransition::Exited { from } => {
                let command = self.command_for(from);
                if command.is_continuous() {
                    events.push(PipelineEvent::ActionCancelled {
                        zone: from,
                        command,
                    });
                }
                self.dwell.clear();
                events.push(PipelineEvent::ZoneCleared { from, command });
            }
        }

        match self.dwell.evaluate(now_ms) {
            DwellOutcome::Idle => {}
            DwellOutcome::Progress { zone, fraction } => {
                events.push(PipelineEvent::DwellProgress {
                    zone,
                    command: self.command_for(zone),
                    fraction,
                });
            }
            DwellOutcome::Fired { zone } => {
                let command = self.command_for(zone);
                info!(zone, command = command.as_str(), "dwell activation");
                events.push(PipelineEvent::Activated { zone, command });
            }
        }
    }

    /// Change the smoothing strategy. Per the undefined-behavior ruling on
    /// warm switches, this resets the whole pipeline.
    pub fn set_strategy(&mut self, strategy: SmoothingStrategy) {
        self.filter.set_strategy(strategy);
        self.reset();
    }

    /// Apply a new viewport. Zone geometry is derived per call, but filter
    /// and gate state are scaled to the old extents, so everything resets.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        info!(
            width = viewport.width,
            height = viewport.height,
            "viewport changed, pipeline reset"
        );
        self.viewport = viewport;
        self.reset();
    }

    /// Wholesale reset of every stage.
    pub fn reset(&mut self) {
        self.gate.reset();
        self.filter.reset();
        self.arbiter.reset();
        self.dwell.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        // Zero margin so raw coordinates equal normalized ones (the margin
        // path is covered in normalize::tests), and a permissive gate so
        // scripted jumps between screen regions are not vetoed — the gate's
        // own thresholds are covered in gate::tests.
        let mut config = PipelineConfig::default();
        config.edge_margin = 0.0;
        config.velocity_threshold = 1e9;
        config.outlier_threshold = 1e9;
        let viewport = Viewport::new(1000.0, 800.0).unwrap();
        let mut p = Pipeline::new(config, viewport).unwrap();
        p.set_commands_enabled(true);
        p
    }

    fn sample(x: f64, y: f64, t_ms: f64) -> RawSample {
        RawSample {
            x,
            y,
            confidence: Some(0.9),
            t_ms,
        }
    }

    /// Feed the same position repeatedly so the Kalman estimate settles
    /// onto it before timing-sensitive assertions.
    fn settle(p: &mut Pipeline, x: f64, y: f64, from_ms: f64, n: usize) -> f64 {
        let mut t = from_ms;
        for _ in 0..n {
            p.process_sample(sample(x, y, t));
            t += 33.0;
        }
        t
    }

    #[test]
    fn test_accepted_sample_moves_gaze() {
        let mut p = pipeline();
        let events = p.process_sample(sample(500.0, 400.0, 0.0));
        assert!(matches!(events[0], PipelineEvent::GazeMoved { .. }));
    }

    #[test]
    fn test_low_confidence_sample_is_silent() {
        let mut p = pipeline();
        let events = p.process_sample(RawSample {
            x: 500.0,
            y: 400.0,
            confidence: Some(0.05),
            t_ms: 0.0,
        });
        assert!(events.is_empty());
    }

    #[test]
    fn test_zone_entry_and_activation() {
        let mut p = pipeline();
        let t = settle(&mut p, 950.0, 500.0, 0.0, 4);

        assert_eq!(p.current_zone(), Some(3));

        // Hold via ticks until one dwell interval elapses.
        let mut fired = Vec::new();
        let mut now = t;
        while now < t + 700.0 {
            for e in p.tick(now) {
                if let PipelineEvent::Activated { zone, .. } = e {
                    fired.push(zone);
                }
            }
            now += 16.0;
        }
        assert_eq!(fired, vec![3], "exactly one zone-3 activation");
    }

    #[test]
    fn test_leaving_strip_clears_zone_and_cancels_scroll() {
        let mut p = pipeline();
        // Zone 0 is scroll-up (continuous).
        let t = settle(&mut p, 950.0, 50.0, 0.0, 4);
        assert_eq!(p.current_zone(), Some(0));

        // Move to screen center; once the filtered position crosses out of
        // the strip the zone clears and the scroll action is cancelled.
        let mut seen_cancel = false;
        let mut seen_clear = false;
        for i in 0..20 {
            for e in p.process_sample(sample(400.0, 400.0, t + i as f64 * 33.0)) {
                match e {
                    PipelineEvent::ActionCancelled { zone: 0, .. } => seen_cancel = true,
                    PipelineEvent::ZoneCleared { from: 0, .. } => seen_clear = true,
                    _ => {}
                }
            }
        }
        assert!(seen_cancel, "scroll-up must be cancelled on strip exit");
        assert!(seen_clear);
        assert_eq!(p.current_zone(), None);
    }

    #[test]
    fn test_outlier_glitch_holds_zone() {
        // Default gate thresholds: a single wild sample must not move the
        // displayed position or drop the committed zone.
        let mut config = PipelineConfig::default();
        config.edge_margin = 0.0;
        let viewport = Viewport::new(1000.0, 800.0).unwrap();
        let mut p = Pipeline::new(config, viewport).unwrap();
        p.set_commands_enabled(true);

        let t = settle(&mut p, 950.0, 500.0, 0.0, 6);
        assert_eq!(p.current_zone(), Some(3));
        let held = p.display_position().unwrap();

        // A glitch sample far away, two seconds later so its speed is under
        // the saccade threshold; the gate holds the prior filtered position.
        let events = p.process_sample(sample(100.0, 100.0, t + 2000.0));
        match events[0] {
            PipelineEvent::GazeMoved { x, y } => {
                assert_eq!(Point::new(x, y), held);
            }
            other => panic!("expected held gaze, got {:?}", other),
        }
        assert_eq!(p.current_zone(), Some(3));
    }

    #[test]
    fn test_commands_suppressed_until_enabled() {
        let mut config = PipelineConfig::default();
        config.edge_margin = 0.0;
        let viewport = Viewport::new(1000.0, 800.0).unwrap();
        let mut p = Pipeline::new(config, viewport).unwrap();

        let events = p.process_sample(sample(950.0, 500.0, 0.0));
        // Preview works, zones do not.
        assert!(matches!(events[0], PipelineEvent::GazeMoved { .. }));
        assert_eq!(events.len(), 1);
        assert_eq!(p.current_zone(), None);
    }

    #[test]
    fn test_disabling_cancels_in_progress_zone() {
        let mut p = pipeline();
        settle(&mut p, 950.0, 50.0, 0.0, 4);
        assert_eq!(p.current_zone(), Some(0));

        let events = p.set_commands_enabled(false);
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ActionCancelled { zone: 0, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ZoneCleared { from: 0, .. })));
        assert_eq!(p.current_zone(), None);
    }

    #[test]
    fn test_tick_emits_progress() {
        let mut p = pipeline();
        let t = settle(&mut p, 950.0, 500.0, 0.0, 4);
        let events = p.tick(t + 100.0);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::DwellProgress { zone: 3, fraction, .. } if *fraction > 0.0
        )));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut p = pipeline();
        settle(&mut p, 950.0, 500.0, 0.0, 4);
        p.reset();
        assert_eq!(p.current_zone(), None);
        assert!(p.display_position().is_none());
        assert!(p.tick(10_000.0).is_empty());
    }

    #[test]
    fn test_viewport_change_resets() {
        let mut p = pipeline();
        settle(&mut p, 950.0, 500.0, 0.0, 4);
        p.set_viewport(Viewport::new(2000.0, 800.0).unwrap());
        assert_eq!(p.current_zone(), None);
        assert!(p.display_position().is_none());
    }
}
