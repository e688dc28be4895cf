//! gazectl — dwell-based gaze control daemon.
//!
//! Bridges an upstream gaze-estimation process to downstream UI clients:
//! samples in, filtered positions and activation commands out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use clap::Parser;
use tracing::info;

use gazectl::clock::SystemClock;
use gazectl::config::{
    CalibrationConfig, PipelineConfig, SessionConfig, SmoothingStrategy, Viewport,
};
use gazectl::session::Session;
use gazectl::sim::{SimMode, SimulatedGaze};
use gazectl::ui_server::UiServer;

#[derive(Parser, Debug)]
#[command(name = "gazectl", about = "Dwell-based gaze control daemon")]
struct Cli {
    /// Upstream gaze source address
    #[arg(long, default_value = "127.0.0.1:8765")]
    upstream: String,

    /// UI socket path (default: $XDG_RUNTIME_DIR/gazectl.sock)
    #[arg(long)]
    ui_socket: Option<PathBuf>,

    /// Viewport resolution (WxH)
    #[arg(long, default_value = "1920x1080")]
    viewport: String,

    /// Pipeline tick interval in milliseconds
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Dwell time before a zone activates (ms)
    #[arg(long)]
    dwell_ms: Option<f64>,

    /// Activation strip width (px)
    #[arg(long)]
    strip_width: Option<f64>,

    /// Edge margin trimmed before rescaling (fraction, < 0.5)
    #[arg(long)]
    margin: Option<f64>,

    /// Smoothing strategy: kalman, lowpass, or weighted-average
    #[arg(long, default_value = "kalman")]
    smoothing: String,

    /// Run against a simulated source: sweep or fixations
    #[arg(long)]
    simulate: Option<String>,

    /// Open the calibration gate immediately
    #[arg(long)]
    skip_calibration: bool,

    /// Record a session trace (JSON lines) to this path
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Calibration state file (default: <config_dir>/gazectl/calibration.json)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Horizontal sensitivity forwarded to the estimator
    #[arg(long)]
    sensitivity_x: Option<f64>,

    /// Vertical sensitivity forwarded to the estimator
    #[arg(long)]
    sensitivity_y: Option<f64>,

    /// Exit after N seconds (simulation and testing)
    #[arg(long)]
    exit_after: Option<u64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

/// Parse a `WxH` resolution string.
fn parse_resolution(s: &str) -> anyhow::Result<(f64, f64)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow!("invalid resolution '{}', expected WxH", s))?;
    Ok((
        w.parse().with_context(|| format!("invalid width '{}'", w))?,
        h.parse().with_context(|| format!("invalid height '{}'", h))?,
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("gazectl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gazectl=info".into()),
        )
        .init();

    let (width, height) = parse_resolution(&cli.viewport)?;
    let viewport = Viewport::new(width, height)?;

    let mut pipeline_config = PipelineConfig::default();
    if let Some(v) = cli.dwell_ms {
        pipeline_config.dwell_ms = v;
    }
    if let Some(v) = cli.strip_width {
        pipeline_config.strip_width = v;
    }
    if let Some(v) = cli.margin {
        pipeline_config.edge_margin = v;
    }
    pipeline_config.smoothing = SmoothingStrategy::from_str(&cli.smoothing)
        .ok_or_else(|| anyhow!("unknown smoothing strategy '{}'", cli.smoothing))?;

    let mut session_config = SessionConfig::default();
    session_config.upstream_addr = cli.upstream;
    session_config.tick_ms = cli.tick_ms;
    if let Some(path) = cli.ui_socket {
        session_config.ui_socket = path;
    }
    if let Some(path) = cli.state_file {
        session_config.state_file = path;
    }

    let mut event_loop: EventLoop<Session> = EventLoop::try_new()?;
    let handle = event_loop.handle();

    let mut session = Session::new(
        handle.clone(),
        Arc::new(SystemClock),
        session_config,
        pipeline_config,
        CalibrationConfig::default(),
        viewport,
    )?;

    if cli.skip_calibration {
        session.calibration.skip();
    }
    if cli.sensitivity_x.is_some() || cli.sensitivity_y.is_some() {
        session.sensitivity = Some((cli.sensitivity_x, cli.sensitivity_y));
    }
    if let Some(path) = cli.trace {
        session.enable_trace(path);
    }
    if let Some(mode) = &cli.simulate {
        let mode = SimMode::from_str(mode)
            .ok_or_else(|| anyhow!("unknown simulation mode '{}'", mode))?;
        info!(mode = mode.as_str(), "running against simulated source");
        session.set_provider(Box::new(SimulatedGaze::new(mode, width, height)));
    }

    let ui_socket = session.config.ui_socket.clone();
    UiServer::bind(&ui_socket, &handle)?;

    let tick = Duration::from_millis(session.config.tick_ms);
    handle
        .insert_source(Timer::from_duration(tick), move |_deadline, _, session| {
            session.on_tick();
            TimeoutAction::ToDuration(tick)
        })
        .map_err(|e| anyhow!("failed to insert tick timer: {e}"))?;

    let check = Duration::from_millis(session.config.watchdog_check_ms);
    handle
        .insert_source(Timer::from_duration(check), move |_deadline, _, session| {
            session.on_watchdog_check();
            TimeoutAction::ToDuration(check)
        })
        .map_err(|e| anyhow!("failed to insert watchdog timer: {e}"))?;

    if let Some(secs) = cli.exit_after {
        let signal = event_loop.get_signal();
        handle
            .insert_source(
                Timer::from_duration(Duration::from_secs(secs)),
                move |_deadline, _, session: &mut Session| {
                    info!("exit timer elapsed, stopping");
                    session.running = false;
                    signal.stop();
                    TimeoutAction::Drop
                },
            )
            .map_err(|e| anyhow!("failed to insert exit timer: {e}"))?;
    }

    info!(
        upstream = %session.upstream.addr(),
        ui_socket = %session.config.ui_socket.display(),
        "gazectl v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    event_loop.run(None, &mut session, |_| {})?;
    session.shutdown();
    Ok(())
}
