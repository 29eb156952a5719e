//! Actuation loop.
//! Polls the store for `pending_move`, turns both squares into screen points
//! and replays the move as two taps. `move_executing` is raised around the
//! taps so the perception loop holds off capturing a half-applied board.
//! The pending move is only cleared once both taps went through; a failed move
//! is replayed on a later poll (at-least-once).
//! With pull delivery `/getmove` is asked at most once per reported occupancy,
//! so a move already played is not fetched and tapped again.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::board::{MoveNotation, Orientation};
use crate::config::{Config, MoveDelivery, Timings};
use crate::geometry::{BoardRect, square_center};
use crate::lifecycle::pause;
use crate::store::{StateStore, StoreError, keys};
use crate::sync_client::{RemoteSync, ServiceReply};
use crate::tap::{TapError, TapInjector, tap_with_retry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The perception side isn't running; nothing consumed.
    ServiceInactive,
    NoMove,
    /// A move is pending but the board orientation isn't known yet.
    AwaitingOrientation,
    /// The pending value wasn't a move and was cleared.
    Discarded(String),
    Executed(MoveNotation),
    /// A tap ran out of attempts; the move stays pending.
    TapFailed(TapError),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("decision service unreachable: {0}")]
    Network(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ActuationLoop {
    store: Arc<dyn StateStore>,
    tapper: Arc<dyn TapInjector>,
    /// Only used with pull delivery.
    remote: Option<Arc<dyn RemoteSync>>,
    /// Stored occupancy the service last answered `/getmove` for.
    answered_snapshot: Option<String>,
    board: BoardRect,
    timings: Timings,
}

impl ActuationLoop {
    pub fn new(
        config: &Config,
        store: Arc<dyn StateStore>,
        tapper: Arc<dyn TapInjector>,
        remote: Arc<dyn RemoteSync>,
    ) -> Self {
        let remote = match config.delivery {
            MoveDelivery::Pull => Some(remote),
            MoveDelivery::Push => None,
        };
        Self {
            store,
            tapper,
            remote,
            answered_snapshot: None,
            board: config.board,
            timings: config.timings.clone(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            pulls_moves = self.remote.is_some(),
            period = ?self.timings.actuation_period(),
            "Actuation loop starting"
        );
        // A flag left behind by a crash mid-move would stall perception forever
        if let Err(e) = self.store.set_flag(keys::MOVE_EXECUTING, false) {
            warn!(error = %e, "Failed to clear stale move_executing flag");
        }

        loop {
            let delay = match self.poll_once().await {
                Ok(PollOutcome::ServiceInactive) => {
                    debug!("Service inactive, idling");
                    self.timings.actuation_idle()
                }
                Ok(outcome) => {
                    debug!(?outcome, "Actuation poll done");
                    self.timings.actuation_period()
                }
                Err(e) => {
                    warn!(error = %e, "Actuation poll failed, backing off");
                    self.timings.actuation_backoff()
                }
            };
            if !pause(delay, &mut shutdown).await {
                break;
            }
        }
        info!("Actuation loop stopped");
    }

    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        if !self.store.flag(keys::SERVICE_ACTIVE)? {
            return Ok(PollOutcome::ServiceInactive);
        }

        let pending = match self.store.value(keys::PENDING_MOVE)? {
            Some(mv) => mv,
            None => match self.pull_move().await? {
                Some(mv) => mv,
                None => return Ok(PollOutcome::NoMove),
            },
        };

        let Some(orientation) = self.orientation()? else {
            debug!(mv = %pending, "Move waiting for orientation");
            return Ok(PollOutcome::AwaitingOrientation);
        };

        let mv = match pending.parse::<MoveNotation>() {
            Ok(mv) => mv,
            Err(e) => {
                warn!(error = %e, "Discarding malformed pending move");
                self.store.remove(keys::PENDING_MOVE)?;
                return Ok(PollOutcome::Discarded(pending));
            }
        };

        self.store.set_flag(keys::MOVE_EXECUTING, true)?;
        let taps = self.replay(mv, orientation).await;
        self.store.set_flag(keys::MOVE_EXECUTING, false)?;

        match taps {
            Ok(()) => {
                self.store.remove(keys::PENDING_MOVE)?;
                info!(mv = %mv, %orientation, "Move executed");
                Ok(PollOutcome::Executed(mv))
            }
            Err(e) => {
                warn!(mv = %mv, error = %e, "Move not executed, keeping it pending");
                Ok(PollOutcome::TapFailed(e))
            }
        }
    }

    /// Pull delivery: asks `/getmove` once per new occupancy report and stores
    /// any move as the pending one. An empty reply is asked again next poll.
    async fn pull_move(&mut self) -> Result<Option<String>, PollError> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        let Some(snapshot) = self.reported_snapshot()? else {
            return Ok(None);
        };
        if self.answered_snapshot.as_ref() == Some(&snapshot) {
            return Ok(None);
        }

        let reply = remote
            .fetch_move()
            .await
            .map_err(|e| PollError::Network(format!("{:#}", e)))?;
        if reply == ServiceReply::Empty {
            return Ok(None);
        }
        self.answered_snapshot = Some(snapshot);
        if reply.is_sentinel() {
            info!(?reply, "Service returned no move");
        }
        let Some(mv) = reply.into_move() else {
            return Ok(None);
        };
        self.store.set(keys::PENDING_MOVE, &mv)?;
        info!(mv = %mv, "Pending move fetched");
        Ok(Some(mv))
    }

    /// Occupancy last acknowledged by the perception loop, as stored.
    fn reported_snapshot(&self) -> Result<Option<String>, StoreError> {
        let side_a = self.store.get(keys::OCCUPANCY_SIDE_A)?;
        let side_b = self.store.get(keys::OCCUPANCY_SIDE_B)?;
        if side_a.is_none() && side_b.is_none() {
            return Ok(None);
        }
        Ok(Some(format!(
            "{};{}",
            side_a.unwrap_or_default(),
            side_b.unwrap_or_default()
        )))
    }

    fn orientation(&self) -> Result<Option<Orientation>, StoreError> {
        let Some(raw) = self.store.value(keys::ORIENTATION)? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(orientation) => Ok(Some(orientation)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable orientation");
                Ok(None)
            }
        }
    }

    async fn replay(&self, mv: MoveNotation, orientation: Orientation) -> Result<(), TapError> {
        let policy = self.timings.tap_policy();
        let from = square_center(mv.from, orientation, &self.board);
        let to = square_center(mv.to, orientation, &self.board);

        tap_with_retry(self.tapper.as_ref(), from, &policy).await?;
        tokio::time::sleep(self.timings.tap_gap()).await;
        tap_with_retry(self.tapper.as_ref(), to, &policy).await
    }
}
