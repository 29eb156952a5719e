//! Board model.
//! Cell labels coming out of the classifier, the session orientation, the two
//! fixed index→square tables and the occupancy snapshot built from them.
//! Move notation parsing lives here too; squares are `shakmaty::Square`.

use std::fmt;
use std::str::FromStr;

use shakmaty::Square;
use thiserror::Error;

pub const CELL_COUNT: usize = 64;

/// The 16 visually-bottom cells (last two rows of the captured grid).
pub const BOTTOM_ROWS: std::ops::RangeInclusive<usize> = 48..=63;

/// Side A is white, side B is black.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// Name sent to the decision service.
    pub fn wire_name(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Classifier output for one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellLabel {
    White,
    Black,
    Empty,
}

impl CellLabel {
    pub fn side(self) -> Option<Side> {
        match self {
            CellLabel::White => Some(Side::White),
            CellLabel::Black => Some(Side::Black),
            CellLabel::Empty => None,
        }
    }
}

/// Which side's home rows sit at the bottom of the captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// White at the bottom, files a-h left to right.
    Normal,
    /// Black at the bottom, files h-a left to right.
    Reversed,
}

impl Orientation {
    pub fn bottom_side(self) -> Side {
        match self {
            Orientation::Normal => Side::White,
            Orientation::Reversed => Side::Black,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Normal => "normal",
            Orientation::Reversed => "reversed",
        }
    }

    fn squares(self) -> &'static [&'static str; CELL_COUNT] {
        match self {
            Orientation::Normal => &SQUARES_NORMAL,
            Orientation::Reversed => &SQUARES_REVERSED,
        }
    }

    /// Square shown at grid index `index` (row-major, row 0 at the top).
    pub fn square_at(self, index: usize) -> Option<&'static str> {
        self.squares().get(index).copied()
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "normal" => Ok(Orientation::Normal),
            "reversed" => Ok(Orientation::Reversed),
            other => Err(format!("unknown orientation '{}'", other)),
        }
    }
}

#[rustfmt::skip]
const SQUARES_NORMAL: [&str; CELL_COUNT] = [
    "a8", "b8", "c8", "d8", "e8", "f8", "g8", "h8",
    "a7", "b7", "c7", "d7", "e7", "f7", "g7", "h7",
    "a6", "b6", "c6", "d6", "e6", "f6", "g6", "h6",
    "a5", "b5", "c5", "d5", "e5", "f5", "g5", "h5",
    "a4", "b4", "c4", "d4", "e4", "f4", "g4", "h4",
    "a3", "b3", "c3", "d3", "e3", "f3", "g3", "h3",
    "a2", "b2", "c2", "d2", "e2", "f2", "g2", "h2",
    "a1", "b1", "c1", "d1", "e1", "f1", "g1", "h1",
];

#[rustfmt::skip]
const SQUARES_REVERSED: [&str; CELL_COUNT] = [
    "h1", "g1", "f1", "e1", "d1", "c1", "b1", "a1",
    "h2", "g2", "f2", "e2", "d2", "c2", "b2", "a2",
    "h3", "g3", "f3", "e3", "d3", "c3", "b3", "a3",
    "h4", "g4", "f4", "e4", "d4", "c4", "b4", "a4",
    "h5", "g5", "f5", "e5", "d5", "c5", "b5", "a5",
    "h6", "g6", "f6", "e6", "d6", "c6", "b6", "a6",
    "h7", "g7", "f7", "e7", "d7", "c7", "b7", "a7",
    "h8", "g8", "f8", "e8", "d8", "c8", "b8", "a8",
];

// *************** Occupancy ***************

/// Squares held by each side, each list sorted lexicographically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub side_a: Vec<String>,
    pub side_b: Vec<String>,
}

impl Occupancy {
    /// Body of the occupancy report, e.g. `white:a1,a2;black:a7,a8`.
    pub fn to_wire(&self) -> String {
        format!(
            "{}:{};{}:{}",
            Side::White.wire_name(),
            self.side_a.join(","),
            Side::Black.wire_name(),
            self.side_b.join(",")
        )
    }

    /// Rebuilds a snapshot from the two stored comma-joined lists.
    pub fn from_stored(side_a: &str, side_b: &str) -> Self {
        fn split(list: &str) -> Vec<String> {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        }
        Self {
            side_a: split(side_a),
            side_b: split(side_b),
        }
    }

    pub fn stored_side_a(&self) -> String {
        self.side_a.join(",")
    }

    pub fn stored_side_b(&self) -> String {
        self.side_b.join(",")
    }
}

/// Buckets every occupied cell into its side's list using the table for `orientation`.
pub fn map_occupancy(labels: &[CellLabel; CELL_COUNT], orientation: Orientation) -> Occupancy {
    let table = orientation.squares();
    let mut occupancy = Occupancy::default();
    for (label, square) in labels.iter().zip(table.iter()) {
        match label.side() {
            Some(Side::White) => occupancy.side_a.push(square.to_string()),
            Some(Side::Black) => occupancy.side_b.push(square.to_string()),
            None => {}
        }
    }
    occupancy.side_a.sort();
    occupancy.side_b.sort();
    occupancy
}

// *************** Move notation ***************

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoveParseError {
    #[error("move '{0}' is not 4 ASCII characters")]
    WrongLength(String),
    #[error("move '{mv}' has an invalid square '{square}'")]
    BadSquare { mv: String, square: String },
}

/// A from/to square pair such as `e2e4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveNotation {
    pub from: Square,
    pub to: Square,
}

impl FromStr for MoveNotation {
    type Err = MoveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mv = s.trim();
        if !mv.is_ascii() || mv.len() != 4 {
            return Err(MoveParseError::WrongLength(mv.to_string()));
        }
        let square = |part: &str| {
            part.parse::<Square>().map_err(|_| MoveParseError::BadSquare {
                mv: mv.to_string(),
                square: part.to_string(),
            })
        };
        Ok(Self {
            from: square(&mv[..2])?,
            to: square(&mv[2..])?,
        })
    }
}

impl fmt::Display for MoveNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)
    }
}
