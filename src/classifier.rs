//! Cell classifier oracle.
//! One image in, one of {White, Black, Empty} out. The pool only sees the
//! `CellClassifier` trait, so a model-backed oracle or a test stub drops in.
//! `LuminanceClassifier` is the native, offline implementation: it compares the
//! center of the cell against the square's own background color.

use anyhow::{Result, bail};
use image::DynamicImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::board::CellLabel;

/// Side length cells are resized to before classification.
pub const INPUT_SIZE: u32 = 96;

pub trait CellClassifier: Send + Sync {
    fn classify(&self, cell: &DynamicImage) -> Result<CellLabel>;
}

/// Thresholds for the native classifier, all on a 0-255 luma scale except the fraction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuminanceClassifier {
    /// Minimum luma distance from the background for a pixel to count as piece.
    pub empty_contrast: f32,
    /// Share of center pixels that must be piece pixels for the cell to be occupied.
    pub min_piece_fraction: f32,
    /// Piece pixels brighter than this on average are white.
    pub light_threshold: f32,
}

impl Default for LuminanceClassifier {
    fn default() -> Self {
        Self {
            empty_contrast: 40.0,
            min_piece_fraction: 0.08,
            light_threshold: 128.0,
        }
    }
}

impl CellClassifier for LuminanceClassifier {
    fn classify(&self, cell: &DynamicImage) -> Result<CellLabel> {
        if cell.width() == 0 || cell.height() == 0 {
            bail!("Cannot classify an empty {}x{} cell", cell.width(), cell.height());
        }
        let luma = imageops::resize(&cell.to_luma8(), INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        // Background from the four corner patches; pieces rarely reach the corners.
        let patch = INPUT_SIZE / 12;
        let far = INPUT_SIZE - patch;
        let mut bg_sum = 0u64;
        let mut bg_count = 0u64;
        for (x0, y0) in [(0, 0), (far, 0), (0, far), (far, far)] {
            for y in y0..y0 + patch {
                for x in x0..x0 + patch {
                    bg_sum += luma.get_pixel(x, y)[0] as u64;
                    bg_count += 1;
                }
            }
        }
        let background = bg_sum as f32 / bg_count as f32;

        let (lo, hi) = (INPUT_SIZE / 4, INPUT_SIZE * 3 / 4);
        let mut piece_sum = 0f32;
        let mut piece_count = 0u32;
        let mut total = 0u32;
        for y in lo..hi {
            for x in lo..hi {
                let v = luma.get_pixel(x, y)[0] as f32;
                total += 1;
                if (v - background).abs() > self.empty_contrast {
                    piece_sum += v;
                    piece_count += 1;
                }
            }
        }

        if piece_count == 0 || (piece_count as f32) < self.min_piece_fraction * total as f32 {
            return Ok(CellLabel::Empty);
        }
        if piece_sum / piece_count as f32 > self.light_threshold {
            Ok(CellLabel::White)
        } else {
            Ok(CellLabel::Black)
        }
    }
}
