//! Config module.
//! Manages I/O for board_config.json (service URL, board bounds, store location,
//! loop timings, classifier thresholds). Uses serde for JSON serialization.
//! Auto-generates defaults when the file is missing; every section falls back
//! to its defaults field by field.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::classifier::LuminanceClassifier;
use crate::geometry::BoardRect;
use crate::tap::TapPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "board_config.json";
const DEFAULT_SERVICE_URL: &str = "http://localhost:5000";

/// Which loop writes `pending_move`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDelivery {
    /// The perception loop records moves returned by the service.
    #[default]
    Push,
    /// The actuation loop fetches `/getmove` itself when idle.
    Pull,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Primary monitor of this machine
    #[default]
    Screen,
    /// Android device over adb
    Adb,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Screen => write!(f, "screen (primary monitor)"),
            SourceKind::Adb => write!(f, "adb (device screencap)"),
        }
    }
}

/// Loop cadences and delays, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub warmup_ms: u64,
    pub perception_period_ms: u64,
    pub perception_backoff_ms: u64,
    pub actuation_period_ms: u64,
    pub actuation_idle_ms: u64,
    pub actuation_backoff_ms: u64,
    pub tap_gap_ms: u64,
    pub tap_retry_delay_ms: u64,
    pub tap_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            warmup_ms: 15_000,
            perception_period_ms: 3_000,
            perception_backoff_ms: 5_000,
            actuation_period_ms: 2_000,
            actuation_idle_ms: 3_000,
            actuation_backoff_ms: 5_000,
            tap_gap_ms: 300,
            tap_retry_delay_ms: 150,
            tap_attempts: 3,
        }
    }
}

impl Timings {
    /// Zero delays with the default tap attempts.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            warmup_ms: 0,
            perception_period_ms: 0,
            perception_backoff_ms: 0,
            actuation_period_ms: 0,
            actuation_idle_ms: 0,
            actuation_backoff_ms: 0,
            tap_gap_ms: 0,
            tap_retry_delay_ms: 0,
            tap_attempts: 3,
        }
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn perception_period(&self) -> Duration {
        Duration::from_millis(self.perception_period_ms)
    }

    pub fn perception_backoff(&self) -> Duration {
        Duration::from_millis(self.perception_backoff_ms)
    }

    pub fn actuation_period(&self) -> Duration {
        Duration::from_millis(self.actuation_period_ms)
    }

    pub fn actuation_idle(&self) -> Duration {
        Duration::from_millis(self.actuation_idle_ms)
    }

    pub fn actuation_backoff(&self) -> Duration {
        Duration::from_millis(self.actuation_backoff_ms)
    }

    pub fn tap_gap(&self) -> Duration {
        Duration::from_millis(self.tap_gap_ms)
    }

    pub fn tap_policy(&self) -> TapPolicy {
        TapPolicy {
            attempts: self.tap_attempts,
            retry_delay: Duration::from_millis(self.tap_retry_delay_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the decision service, e.g. an ngrok tunnel
    pub service_url: String,
    pub board: BoardRect,
    pub store_dir: PathBuf,
    pub pool_size: usize,
    pub delivery: MoveDelivery,
    /// Ask `/getmove` when an occupancy report comes back without a move
    pub fetch_after_report: bool,
    pub source: SourceKind,
    pub adb_serial: Option<String>,
    pub timings: Timings,
    pub classifier: LuminanceClassifier,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            board: BoardRect::default(),
            store_dir: PathBuf::from("state"),
            pool_size: 8,
            delivery: MoveDelivery::Push,
            fetch_after_report: true,
            source: SourceKind::Screen,
            adb_serial: None,
            timings: Timings::default(),
            classifier: LuminanceClassifier::default(),
        }
    }
}

impl Config {
    /// Loads `path`, writing a default file first when none exists.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!(path = %path.display(), "Wrote default config");
            return Ok(config);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.service_url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("service_url must start with http:// or https:// (got '{}')", url);
        }
        if self.board.width() < 64 || self.board.height() < 64 {
            bail!(
                "Board bounds ({},{})-({},{}) too small for a board (min 64x64 pixels)",
                self.board.left, self.board.top, self.board.right, self.board.bottom
            );
        }
        if self.pool_size == 0 {
            bail!("pool_size must be at least 1");
        }
        if self.timings.tap_attempts == 0 {
            bail!("timings.tap_attempts must be at least 1");
        }
        Ok(())
    }
}
