//! Session — the central state object owning every pipeline component.
//!
//! One struct, passed as `&mut self` to every timer and socket callback.
//! Single-threaded and cooperative: each handler finishes its mutation
//! before yielding back to the loop, so no partial state is ever visible
//! across ticks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use calloop::timer::{TimeoutAction, Timer};
use calloop::LoopHandle;
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationGate, FileStore};
use crate::clock::{millis_between, Clock};
use crate::config::{
    CalibrationConfig, ConfigError, PipelineConfig, SessionConfig, Viewport,
};
use crate::pipeline::zones::ZoneCommand;
use crate::pipeline::{Pipeline, PipelineEvent, RawSample};
use crate::protocol::{UiEvent, UiRequest, UpstreamCommand, UpstreamMessage};
use crate::sim::SampleProvider;
use crate::trace::{TraceDirection, TraceRecorder};
use crate::ui_server::UiServer;
use crate::upstream::UpstreamLink;
use crate::watchdog::{LivenessWatchdog, TrackingStatus};

/// Bound on retained trace entries (~3 minutes of full-rate gaze events).
const TRACE_CAPACITY: usize = 10_000;

pub struct Session {
    pub loop_handle: LoopHandle<'static, Session>,
    pub clock: Arc<dyn Clock>,
    origin: Instant,
    pub config: SessionConfig,

    pub pipeline: Pipeline,
    pub calibration: CalibrationGate,
    pub watchdog: LivenessWatchdog,
    pub upstream: UpstreamLink,
    pub ui: UiServer,

    /// Replaces the upstream link when simulating.
    pub provider: Option<Box<dyn SampleProvider>>,
    pub trace: Option<TraceRecorder>,
    trace_path: Option<PathBuf>,
    /// Sensitivity override forwarded upstream after each connect.
    pub sensitivity: Option<(Option<f64>, Option<f64>)>,

    pub status: TrackingStatus,
    pub running: bool,
}

impl Session {
    pub fn new(
        loop_handle: LoopHandle<'static, Session>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        pipeline_config: PipelineConfig,
        calibration_config: CalibrationConfig,
        viewport: Viewport,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipeline = Pipeline::new(pipeline_config, viewport)?;
        let calibration = CalibrationGate::new(
            calibration_config,
            Box::new(FileStore::new(config.state_file.clone())),
        );
        let watchdog = LivenessWatchdog::new(config.watchdog_timeout_ms);
        let upstream = UpstreamLink::new(config.upstream_addr.clone(), config.reconnect_interval_ms);
        let ui = UiServer::new(config.ui_socket.clone());
        let origin = clock.now();

        Ok(Self {
            loop_handle,
            clock,
            origin,
            config,
            pipeline,
            calibration,
            watchdog,
            upstream,
            ui,
            provider: None,
            trace: None,
            trace_path: None,
            sensitivity: None,
            status: TrackingStatus::Disconnected,
            running: true,
        })
    }

    /// Session-relative monotonic time in milliseconds.
    pub fn now_ms(&self) -> f64 {
        millis_between(self.origin, self.clock.now())
    }

    /// Use a simulated sample source instead of the network link. Pause
    /// and stall states are preserved; only a disconnected session goes
    /// live (samples now have a source).
    pub fn set_provider(&mut self, provider: Box<dyn SampleProvider>) {
        self.provider = Some(provider);
        if self.status == TrackingStatus::Disconnected {
            self.set_status(TrackingStatus::Live);
        }
    }

    /// Record a session trace, autosaved to `path` on each watchdog tick.
    pub fn enable_trace(&mut self, path: PathBuf) {
        self.trace = Some(TraceRecorder::new(TRACE_CAPACITY));
        self.trace_path = Some(path);
    }

    // ── Tick handling ───────────────────────────────────────

    /// Main tick: pull samples, advance state machines, service sockets.
    pub fn on_tick(&mut self) {
        let now = self.now_ms();

        if self.provider.is_some() {
            let sample = self
                .provider
                .as_mut()
                .and_then(|p| p.next_sample(now));
            if let Some(sample) = sample {
                if self.status != TrackingStatus::Paused {
                    self.ingest_sample(sample);
                }
            }
        } else {
            self.service_upstream(now);
        }

        let events = self.pipeline.tick(now);
        self.dispatch_events(events);

        UiServer::poll_clients(self);
        self.ui.flush_all();
    }

    fn service_upstream(&mut self, now: f64) {
        if !self.upstream.is_connected() {
            if self.upstream.try_connect(now) {
                self.on_upstream_connected();
            } else if self.status != TrackingStatus::Paused {
                self.set_status(TrackingStatus::Disconnected);
            }
        }

        let messages = self.upstream.poll();
        for message in messages {
            self.record_trace_in(&message);
            self.handle_upstream_message(message);
        }

        if !self.upstream.is_connected() && self.status != TrackingStatus::Paused {
            self.set_status(TrackingStatus::Disconnected);
        }
    }

    fn on_upstream_connected(&mut self) {
        let viewport = self.pipeline.viewport();
        self.send_upstream(UpstreamCommand::ScreenSize {
            width: viewport.width,
            height: viewport.height,
        });
        if let Some((x, y)) = self.sensitivity {
            self.send_upstream(UpstreamCommand::AdjustSensitivity { x, y });
        }
        self.watchdog.reset();
        // A kill-switch pause survives reconnection; tracking stays
        // stopped until the UI resumes.
        if self.status != TrackingStatus::Paused {
            self.send_upstream(UpstreamCommand::StartTracking);
            self.set_status(TrackingStatus::Live);
        }
    }

    // ── Samples and upstream messages ───────────────────────

    fn handle_upstream_message(&mut self, message: UpstreamMessage) {
        match message {
            UpstreamMessage::Gaze { x, y, confidence, .. } => {
                if self.status == TrackingStatus::Paused {
                    return;
                }
                let t_ms = self.now_ms();
                self.ingest_sample(RawSample {
                    x,
                    y,
                    confidence,
                    t_ms,
                });
            }
            UpstreamMessage::CalibrationAck {
                points_collected,
                is_calibrated,
                ..
            } => {
                debug!(points_collected, is_calibrated, "calibration ack");
                if is_calibrated && !self.calibration.is_done() {
                    self.calibration.force_done();
                    self.after_calibration_change();
                }
            }
            UpstreamMessage::CalibrationReset => {
                // Echo of a reset we requested (or one issued server-side);
                // sync without sending another reset back.
                self.calibration.reset();
                self.after_calibration_change();
            }
            UpstreamMessage::Frame { .. } => {}
            UpstreamMessage::Unknown => {
                debug!("ignoring unknown upstream message");
            }
        }
    }

    /// Feed one sample into the pipeline and note liveness.
    pub fn ingest_sample(&mut self, sample: RawSample) {
        self.watchdog.note_sample(sample.t_ms);
        if self.status == TrackingStatus::Stalled {
            self.set_status(TrackingStatus::Live);
        }
        let events = self.pipeline.process_sample(sample);
        self.dispatch_events(events);
    }

    // ── Watchdog ────────────────────────────────────────────

    /// Fixed-interval liveness check. Soft recovery pauses and resumes the
    /// estimator; with no live link, a hard reinitialize reconnects.
    pub fn on_watchdog_check(&mut self) {
        let now = self.now_ms();
        if self.watchdog.check(now, self.calibration.is_done()) {
            self.set_status(TrackingStatus::Stalled);
            // The stream froze with stale filter state; start clean.
            self.pipeline.reset();

            if self.upstream.is_connected() {
                info!("soft recovery: pause/resume cycle");
                self.send_upstream(UpstreamCommand::StopTracking);
                let delay = Duration::from_millis(self.config.recovery_resume_ms);
                let registered = self
                    .loop_handle
                    .insert_source(Timer::from_duration(delay), |_deadline, _, session| {
                        session.finish_soft_recovery();
                        TimeoutAction::Drop
                    });
                if registered.is_err() {
                    warn!("failed to schedule recovery resume, reinitializing");
                    self.hard_reinitialize();
                }
            } else if self.provider.is_none() {
                self.hard_reinitialize();
            }
        }

        self.autosave_trace();
    }

    /// Second half of the soft pause/resume cycle.
    pub fn finish_soft_recovery(&mut self) {
        if self.status == TrackingStatus::Stalled && self.upstream.is_connected() {
            info!("soft recovery: resuming tracking");
            self.send_upstream(UpstreamCommand::StartTracking);
        }
    }

    fn hard_reinitialize(&mut self) {
        info!("hard recovery: reinitializing upstream link");
        self.upstream.disconnect();
        self.set_status(TrackingStatus::Disconnected);
    }

    fn autosave_trace(&self) {
        if let (Some(trace), Some(path)) = (&self.trace, &self.trace_path) {
            if let Err(e) = trace.save(path) {
                warn!(path = %path.display(), "trace autosave failed: {}", e);
            }
        }
    }

    // ── Event dispatch ──────────────────────────────────────

    fn dispatch_events(&mut self, events: Vec<PipelineEvent>) {
        let mut pause_requested = false;
        for event in events {
            let ui_event = match event {
                PipelineEvent::GazeMoved { x, y } => UiEvent::Gaze { x, y },
                PipelineEvent::ZoneEntered { zone, command } => UiEvent::Zone {
                    zone: Some(zone),
                    command: Some(command),
                },
                PipelineEvent::ZoneCleared { .. } => UiEvent::Zone {
                    zone: None,
                    command: None,
                },
                PipelineEvent::DwellProgress {
                    zone,
                    command,
                    fraction,
                } => UiEvent::Dwell {
                    zone,
                    command,
                    progress: fraction,
                },
                PipelineEvent::Activated { zone, command } => {
                    if command == ZoneCommand::KillSwitch {
                        pause_requested = true;
                    }
                    UiEvent::Activate {
                        zone,
                        command,
                        progress: 1.0,
                    }
                }
                PipelineEvent::ActionCancelled { zone, command } => {
                    UiEvent::Cancel { zone, command }
                }
            };
            self.broadcast(ui_event);
        }
        if pause_requested {
            self.pause();
        }
    }

    /// Kill switch: stop the estimator and suppress commands until resume.
    fn pause(&mut self) {
        info!("kill switch engaged, pausing session");
        self.send_upstream(UpstreamCommand::StopTracking);
        self.set_status(TrackingStatus::Paused);
    }

    fn set_status(&mut self, status: TrackingStatus) {
        if self.status == status {
            return;
        }
        info!(from = self.status.as_str(), to = status.as_str(), "status change");
        self.status = status;
        self.broadcast(UiEvent::TrackingStatus { status });
        self.sync_commands();
    }

    /// Activation commands flow only when calibrated and live.
    fn sync_commands(&mut self) {
        let enabled = self.calibration.is_done() && self.status == TrackingStatus::Live;
        let events = self.pipeline.set_commands_enabled(enabled);
        self.dispatch_events(events);
    }

    fn after_calibration_change(&mut self) {
        self.sync_commands();
        let progress = self.calibration.progress();
        self.broadcast(UiEvent::Calibration {
            targets_confirmed: progress.targets_confirmed,
            clicks_on_current_target: progress.clicks_on_current_target,
            done: progress.done,
        });
    }

    // ── UI requests ─────────────────────────────────────────

    /// Handle one UI request; the return value is the direct response.
    pub fn handle_ui_request(&mut self, request: UiRequest) -> UiEvent {
        match request {
            UiRequest::Hello => UiEvent::Ok,
            UiRequest::Status => UiEvent::TrackingStatus {
                status: self.status,
            },
            UiRequest::Viewport { width, height } => match Viewport::new(width, height) {
                Ok(viewport) => {
                    self.pipeline.set_viewport(viewport);
                    self.send_upstream(UpstreamCommand::ScreenSize { width, height });
                    UiEvent::Ok
                }
                Err(e) => UiEvent::Error {
                    reason: e.to_string(),
                },
            },
            UiRequest::CalibrationClick { x, y } => {
                if self.calibration.is_done() {
                    return UiEvent::Error {
                        reason: "calibration already complete".to_string(),
                    };
                }
                self.calibration.click();
                self.send_upstream(UpstreamCommand::CalibrationPoint {
                    screen_x: x,
                    screen_y: y,
                });
                self.after_calibration_change();
                UiEvent::Ok
            }
            UiRequest::SkipCalibration => {
                self.calibration.skip();
                self.after_calibration_change();
                UiEvent::Ok
            }
            UiRequest::ResetCalibration => {
                self.calibration.reset();
                self.send_upstream(UpstreamCommand::ResetCalibration);
                self.after_calibration_change();
                UiEvent::Ok
            }
            UiRequest::Resume => {
                if self.status == TrackingStatus::Paused {
                    self.send_upstream(UpstreamCommand::StartTracking);
                    let next = if self.upstream.is_connected() || self.provider.is_some() {
                        TrackingStatus::Live
                    } else {
                        TrackingStatus::Disconnected
                    };
                    self.set_status(next);
                }
                UiEvent::Ok
            }
        }
    }

    // ── Plumbing ────────────────────────────────────────────

    fn send_upstream(&mut self, command: UpstreamCommand) {
        if let Some(trace) = &mut self.trace {
            let payload = serde_json::to_string(&command).expect("commands always serialize");
            trace.record(
                millis_between(self.origin, self.clock.now()),
                TraceDirection::UpstreamOut,
                &payload,
            );
        }
        self.upstream.send(&command);
    }

    fn record_trace_in(&mut self, message: &UpstreamMessage) {
        // Preview frames are bulky and carry no signal worth keeping.
        if matches!(message, UpstreamMessage::Frame { .. }) {
            return;
        }
        if let Some(trace) = &mut self.trace {
            let payload = serde_json::to_string(message).expect("messages always serialize");
            trace.record(
                millis_between(self.origin, self.clock.now()),
                TraceDirection::UpstreamIn,
                &payload,
            );
        }
    }

    fn broadcast(&mut self, event: UiEvent) {
        if let Some(trace) = &mut self.trace {
            let payload = serde_json::to_string(&event).expect("events always serialize");
            trace.record(
                millis_between(self.origin, self.clock.now()),
                TraceDirection::UiOut,
                &payload,
            );
        }
        self.ui.broadcast(&event);
    }

    /// Shutdown: flush the trace, close the UI socket.
    pub fn shutdown(&mut self) {
        self.running = false;
        self.autosave_trace();
        self.ui.cleanup();
        info!("session shut down");
    }
}
