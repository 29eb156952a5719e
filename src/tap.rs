//! Tap injection.
//! One momentary touch at a screen point, reported as completed or cancelled.
//! `tap_with_retry` gives every tap a bounded number of attempts; running out is
//! a reported failure for that move step, never a fatal one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capture::adb_command;
use crate::geometry::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapOutcome {
    Completed,
    Cancelled,
}

#[async_trait]
pub trait TapInjector: Send + Sync {
    async fn tap(&self, at: Point) -> Result<TapOutcome>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TapPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for TapPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(150),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("tap at ({x},{y}) failed after {attempts} attempts")]
pub struct TapError {
    pub x: u32,
    pub y: u32,
    pub attempts: u32,
}

/// Taps `at` until it completes or `policy.attempts` runs out.
/// Cancellations and injector errors are both retried.
pub async fn tap_with_retry(
    injector: &dyn TapInjector,
    at: Point,
    policy: &TapPolicy,
) -> Result<(), TapError> {
    for attempt in 1..=policy.attempts {
        match injector.tap(at).await {
            Ok(TapOutcome::Completed) => {
                debug!(x = at.x, y = at.y, attempt, "Tap completed");
                return Ok(());
            }
            Ok(TapOutcome::Cancelled) => {
                warn!(x = at.x, y = at.y, attempt, "Tap cancelled");
            }
            Err(e) => {
                warn!(x = at.x, y = at.y, attempt, error = %format!("{:#}", e), "Tap failed");
            }
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }
    Err(TapError {
        x: at.x,
        y: at.y,
        attempts: policy.attempts,
    })
}

/// Injects taps on an Android device with `adb shell input tap`.
pub struct AdbTapInjector {
    serial: Option<String>,
}

impl AdbTapInjector {
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }
}

#[async_trait]
impl TapInjector for AdbTapInjector {
    async fn tap(&self, at: Point) -> Result<TapOutcome> {
        let status = adb_command(self.serial.as_deref())
            .args(["shell", "input", "tap"])
            .arg(at.x.to_string())
            .arg(at.y.to_string())
            .status()
            .await
            .context("Failed to run adb; is it on PATH?")?;
        Ok(if status.success() {
            TapOutcome::Completed
        } else {
            TapOutcome::Cancelled
        })
    }
}
