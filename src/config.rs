//! Pipeline and session configuration.
//!
//! All tunables live here with the defaults the rest of the crate assumes.
//! Invalid combinations (degenerate margin, zero zones, non-positive
//! timings) are fatal at construction time, never discovered mid-stream.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::zones::ZoneCommand;

/// Configuration rejected at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("edge margin {0} out of range (must be in [0, 0.5))")]
    InvalidMargin(f64),
    #[error("zone command list is empty")]
    NoZones,
    #[error("activation strip width {0} must be positive")]
    InvalidStripWidth(f64),
    #[error("{name} of {value} ms must be positive")]
    InvalidDuration { name: &'static str, value: f64 },
    #[error("viewport {0}x{1} is degenerate")]
    InvalidViewport(f64, f64),
    #[error("smoothing window must hold at least 2 samples, got {0}")]
    InvalidWindow(usize),
    #[error("low-pass alpha {0} out of range (must be in (0, 1])")]
    InvalidAlpha(f64),
}

/// Viewport dimensions in CSS pixels, as reported by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Result<Self, ConfigError> {
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(ConfigError::InvalidViewport(width, height));
        }
        Ok(Self { width, height })
    }
}

/// Smoothing strategy selection for the adaptive filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingStrategy {
    /// Per-axis scalar Kalman filter (default; gain adapts automatically).
    Kalman,
    /// Exponential low-pass fallback.
    Lowpass,
    /// Weighted moving average over a short window.
    WeightedAverage,
}

impl SmoothingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kalman => "kalman",
            Self::Lowpass => "lowpass",
            Self::WeightedAverage => "weighted-average",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "kalman" => Some(Self::Kalman),
            "lowpass" => Some(Self::Lowpass),
            "weighted-average" => Some(Self::WeightedAverage),
            _ => None,
        }
    }
}

/// Tunables for the signal-conditioning pipeline and activation machinery.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Edge margin trimmed from each axis before rescaling (fraction, < 0.5).
    pub edge_margin: f64,
    /// Samples with confidence below this are dropped.
    pub min_confidence: f64,
    /// Gaze speed above this (px/s) is treated as a saccade.
    pub velocity_threshold: f64,
    /// Distance from the prior filtered position (px) beyond which a sample
    /// is an outlier.
    pub outlier_threshold: f64,
    /// Active smoothing strategy.
    pub smoothing: SmoothingStrategy,
    /// Kalman process noise.
    pub process_noise: f64,
    /// Kalman measurement noise.
    pub measurement_noise: f64,
    /// Low-pass alpha (fallback strategy).
    pub lowpass_alpha: f64,
    /// Weighted-average window length.
    pub average_window: usize,
    /// Width of the activation strip at the right viewport edge (px).
    pub strip_width: f64,
    /// Commands mapped to zones, top to bottom. Zone count is the length.
    pub zone_commands: Vec<ZoneCommand>,
    /// A candidate zone must stay stable this long before a switch commits.
    pub zone_switch_delay_ms: f64,
    /// Sustained occupancy required before a zone activates.
    pub dwell_ms: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            edge_margin: 0.08,
            min_confidence: 0.3,
            velocity_threshold: 1200.0,
            outlier_threshold: 200.0,
            smoothing: SmoothingStrategy::Kalman,
            process_noise: 8.0,
            measurement_noise: 20.0,
            lowpass_alpha: 0.5,
            average_window: 4,
            strip_width: 140.0,
            zone_commands: ZoneCommand::sidebar_layout(),
            zone_switch_delay_ms: 100.0,
            dwell_ms: 600.0,
        }
    }
}

impl PipelineConfig {
    /// Number of vertical zones in the activation strip.
    pub fn zone_count(&self) -> usize {
        self.zone_commands.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.edge_margin.is_finite() || self.edge_margin < 0.0 || self.edge_margin >= 0.5 {
            return Err(ConfigError::InvalidMargin(self.edge_margin));
        }
        if self.zone_commands.is_empty() {
            return Err(ConfigError::NoZones);
        }
        if !self.strip_width.is_finite() || self.strip_width <= 0.0 {
            return Err(ConfigError::InvalidStripWidth(self.strip_width));
        }
        for (name, value) in [
            ("zone switch delay", self.zone_switch_delay_ms),
            ("dwell time", self.dwell_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidDuration { name, value });
            }
        }
        if self.average_window < 2 {
            return Err(ConfigError::InvalidWindow(self.average_window));
        }
        if !self.lowpass_alpha.is_finite() || self.lowpass_alpha <= 0.0 || self.lowpass_alpha > 1.0
        {
            return Err(ConfigError::InvalidAlpha(self.lowpass_alpha));
        }
        Ok(())
    }
}

/// Calibration protocol parameters.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationConfig {
    /// Distinct on-screen targets the protocol collects.
    pub points: u32,
    /// Repeated confirmations required per target.
    pub clicks_per_point: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            points: 9,
            clicks_per_point: 2,
        }
    }
}

/// Session-level timing and endpoint configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pipeline re-evaluation tick interval (ms).
    pub tick_ms: u64,
    /// Watchdog check interval (ms).
    pub watchdog_check_ms: u64,
    /// Silence on the sample stream longer than this means frozen (ms).
    pub watchdog_timeout_ms: f64,
    /// Delay between the soft-recovery pause and resume (ms).
    pub recovery_resume_ms: u64,
    /// Interval between upstream reconnection attempts (ms).
    pub reconnect_interval_ms: f64,
    /// Upstream gaze source address.
    pub upstream_addr: String,
    /// UI socket path.
    pub ui_socket: PathBuf,
    /// Persisted calibration flag location.
    pub state_file: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 16,
            watchdog_check_ms: 3000,
            watchdog_timeout_ms: 5000.0,
            recovery_resume_ms: 500,
            reconnect_interval_ms: 2000.0,
            upstream_addr: "127.0.0.1:8765".to_string(),
            ui_socket: default_ui_socket(),
            state_file: default_state_file(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("tick interval", self.tick_ms as f64),
            ("watchdog check interval", self.watchdog_check_ms as f64),
            ("watchdog timeout", self.watchdog_timeout_ms),
            ("recovery resume delay", self.recovery_resume_ms as f64),
            ("reconnect interval", self.reconnect_interval_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidDuration { name, value });
            }
        }
        Ok(())
    }
}

/// Default UI socket path: `$XDG_RUNTIME_DIR/gazectl.sock`, falling back
/// to the system temp directory.
pub fn default_ui_socket() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    dir.join("gazectl.sock")
}

/// Default persisted-state location: `<config_dir>/gazectl/calibration.json`.
pub fn default_state_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gazectl")
        .join("calibration.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_margin_half_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.edge_margin = 0.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidMargin(_))
        ));
    }

    #[test]
    fn test_zero_zones_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.zone_commands.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoZones)));
    }

    #[test]
    fn test_negative_dwell_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.dwell_ms = -5.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_viewport_validation() {
        assert!(Viewport::new(1920.0, 1080.0).is_ok());
        assert!(Viewport::new(0.0, 1080.0).is_err());
        assert!(Viewport::new(f64::NAN, 1080.0).is_err());
    }

    #[test]
    fn test_strategy_roundtrip() {
        for s in [
            SmoothingStrategy::Kalman,
            SmoothingStrategy::Lowpass,
            SmoothingStrategy::WeightedAverage,
        ] {
            assert_eq!(SmoothingStrategy::from_str(s.as_str()), Some(s));
        }
        assert_eq!(SmoothingStrategy::from_str("cubic"), None);
    }

    #[test]
    fn test_default_zone_count_is_five() {
        assert_eq!(PipelineConfig::default().zone_count(), 5);
    }
}
