//! Orientation resolver.
//! Decides once per session which side sits at the bottom of the frame and
//! freezes the answer in the store. Edge cells can misclassify mid-game, so the
//! first decision is never revisited until the session is reset.

use tracing::{info, warn};

use crate::board::{BOTTOM_ROWS, CELL_COUNT, CellLabel, Orientation};
use crate::store::{StateStore, StoreResult, keys};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Resolved(Orientation),
}

pub struct OrientationResolver {
    state: Resolution,
}

impl OrientationResolver {
    /// Starts resolved when the store already holds this session's orientation.
    pub fn load(store: &dyn StateStore) -> StoreResult<Self> {
        let state = match store.value(keys::ORIENTATION)? {
            Some(raw) => match raw.parse::<Orientation>() {
                Ok(o) => {
                    info!(orientation = %o, "Reusing stored orientation");
                    Resolution::Resolved(o)
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable stored orientation");
                    Resolution::Unresolved
                }
            },
            None => Resolution::Unresolved,
        };
        Ok(Self { state })
    }

    pub fn state(&self) -> Resolution {
        self.state
    }

    /// Returns the session orientation, deciding and persisting it on first call.
    pub fn resolve(
        &mut self,
        labels: &[CellLabel; CELL_COUNT],
        store: &dyn StateStore,
    ) -> StoreResult<Orientation> {
        if let Resolution::Resolved(o) = self.state {
            return Ok(o);
        }
        let orientation = detect_orientation(labels);
        store.set(keys::ORIENTATION, orientation.as_str())?;
        self.state = Resolution::Resolved(orientation);
        info!(
            orientation = %orientation,
            bottom = %orientation.bottom_side(),
            "Board orientation resolved"
        );
        Ok(orientation)
    }
}

/// White at the bottom unless black holds strictly more of the bottom two rows.
pub fn detect_orientation(labels: &[CellLabel; CELL_COUNT]) -> Orientation {
    let (white, black) = labels[BOTTOM_ROWS]
        .iter()
        .fold((0usize, 0usize), |(w, b), label| match label {
            CellLabel::White => (w + 1, b),
            CellLabel::Black => (w, b + 1),
            CellLabel::Empty => (w, b),
        });
    if white >= black {
        Orientation::Normal
    } else {
        Orientation::Reversed
    }
}
