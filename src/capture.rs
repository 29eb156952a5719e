//! Screen capture module
//! Two frame sources: the primary monitor via `xcap`, or an Android device via
//! `adb exec-out screencap -p`. Either may report "no frame", which the
//! perception loop treats as a skipped cycle rather than an error.
//! Cells are cropped from the configured board rectangle.
//! Debug: set `DEBUG_CAPTURE=1` to save the frame with the board grid drawn on
//! it to `screenshots/debug_board.png`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, Rgba};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::env;
use std::fs;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;
use xcap::Monitor;

use crate::board::CELL_COUNT;
use crate::geometry::BoardRect;

const DEBUG_PATH: &str = "screenshots/debug_board.png";

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// One full frame, or `None` when nothing is available right now.
    async fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}

/// Primary monitor of the machine running the relay.
/// Permissions note: on macOS, grant "Screen & System Audio Recording" to the terminal.
pub struct ScreenFrameSource;

#[async_trait]
impl FrameSource for ScreenFrameSource {
    async fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        tokio::task::spawn_blocking(capture_primary_monitor)
            .await
            .context("Screen capture task failed")?
    }
}

fn capture_primary_monitor() -> Result<Option<DynamicImage>> {
    let start = Instant::now();

    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    let Some(primary_monitor) = monitors.first() else {
        return Ok(None);
    };

    let screenshot_raw = primary_monitor
        .capture_image()
        .context("Failed to capture image. On macOS, ensure Terminal has Screen Recording permission in System Settings > Privacy & Security > Screen & System Audio Recording")?;

    let screenshot = DynamicImage::ImageRgba8(screenshot_raw);
    if screenshot.dimensions() == (0, 0) {
        return Ok(None);
    }

    debug!(latency = ?start.elapsed(), "Screen captured");
    Ok(Some(screenshot))
}

/// Screen of an Android device reached through `adb`.
pub struct AdbFrameSource {
    serial: Option<String>,
}

impl AdbFrameSource {
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }
}

/// `adb` invocation, targeting `serial` when several devices are attached.
pub(crate) fn adb_command(serial: Option<&str>) -> Command {
    let mut cmd = Command::new("adb");
    if let Some(serial) = serial {
        cmd.args(["-s", serial]);
    }
    cmd
}

#[async_trait]
impl FrameSource for AdbFrameSource {
    async fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let start = Instant::now();
        let output = adb_command(self.serial.as_deref())
            .args(["exec-out", "screencap", "-p"])
            .output()
            .await
            .context("Failed to run adb; is it on PATH?")?;

        if !output.status.success() {
            bail!(
                "adb screencap exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout.is_empty() {
            return Ok(None);
        }

        let frame = image::load_from_memory(&output.stdout)
            .context("Failed to decode adb screencap output")?;
        debug!(latency = ?start.elapsed(), bytes = output.stdout.len(), "Device screen captured");
        Ok(Some(frame))
    }
}

/// Crops the 64 board cells, row-major from the top-left cell.
pub fn extract_cells(frame: &DynamicImage, bounds: &BoardRect) -> Result<Vec<DynamicImage>> {
    if bounds.width() < 64 || bounds.height() < 64 {
        bail!("Board bounds too small for an 8x8 board (min 64x64 pixels)");
    }

    let (screen_w, screen_h) = frame.dimensions();
    if bounds.right > screen_w || bounds.bottom > screen_h {
        bail!(
            "Board bounds ({},{})-({},{}) exceed frame dimensions {}x{}",
            bounds.left, bounds.top, bounds.right, bounds.bottom, screen_w, screen_h
        );
    }

    if env::var_os("DEBUG_CAPTURE").is_some() {
        save_debug_overlay(frame, bounds)?;
    }

    Ok((0..CELL_COUNT)
        .map(|i| {
            let cell = bounds.cell_bounds(i);
            frame.crop_imm(cell.x, cell.y, cell.width, cell.height)
        })
        .collect())
}

/// Draws the board rectangle and its 8x8 grid in red and saves the frame.
fn save_debug_overlay(frame: &DynamicImage, bounds: &BoardRect) -> Result<()> {
    let red = Rgba([255u8, 0, 0, 255]);
    let mut canvas = frame.to_rgba8();

    draw_hollow_rect_mut(
        &mut canvas,
        Rect::at(bounds.left as i32, bounds.top as i32).of_size(bounds.width(), bounds.height()),
        red,
    );
    let (left, top) = (bounds.left as f32, bounds.top as f32);
    let (right, bottom) = (bounds.right as f32, bounds.bottom as f32);
    for i in 1..8 {
        let x = left + (i * bounds.cell_width()) as f32;
        let y = top + (i * bounds.cell_height()) as f32;
        draw_line_segment_mut(&mut canvas, (x, top), (x, bottom), red);
        draw_line_segment_mut(&mut canvas, (left, y), (right, y), red);
    }

    fs::create_dir_all("screenshots").context("Failed to create screenshots/ debug directory")?;
    canvas
        .save(DEBUG_PATH)
        .context("Failed to save debug board image to screenshots/")?;
    Ok(())
}
