//! Screen geometry of the board.
//! The board rectangle is split into an 8x8 grid of equal cells (integer
//! division); capture crops cells from it and the actuator taps cell centers.

use serde::{Deserialize, Serialize};
use shakmaty::Square;

use crate::board::Orientation;

/// Board rectangle in screen pixels, `right`/`bottom` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Default for BoardRect {
    fn default() -> Self {
        Self {
            left: 11,
            top: 505,
            right: 709,
            bottom: 1201,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Crop region of one grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoardRect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn cell_width(&self) -> u32 {
        self.width() / 8
    }

    pub fn cell_height(&self) -> u32 {
        self.height() / 8
    }

    /// Bounds of the cell at row-major `index` (row 0 at the top).
    pub fn cell_bounds(&self, index: usize) -> CellBounds {
        let row = (index / 8) as u32;
        let col = (index % 8) as u32;
        CellBounds {
            x: self.left + col * self.cell_width(),
            y: self.top + row * self.cell_height(),
            width: self.cell_width(),
            height: self.cell_height(),
        }
    }

    fn cell_center(&self, col: u32, row: u32) -> Point {
        Point {
            x: self.left + col * self.cell_width() + self.cell_width() / 2,
            y: self.top + row * self.cell_height() + self.cell_height() / 2,
        }
    }
}

/// Pixel center of `square` on screen for the session orientation.
pub fn square_center(square: Square, orientation: Orientation, rect: &BoardRect) -> Point {
    let file = square.file().char() as u32 - 'a' as u32;
    let rank = square.rank().char() as u32 - '1' as u32;
    let (col, row) = match orientation {
        Orientation::Normal => (file, 7 - rank),
        Orientation::Reversed => (7 - file, rank),
    };
    rect.cell_center(col, row)
}
