//! Perception loop.
//! Capture -> 64 cells -> classifier pool -> orientation -> occupancy -> report.
//! Occupancy is only sent when it differs from the last snapshot the service
//! acknowledged, and a move returned by the service becomes the single
//! `pending_move`. While a move is pending or being executed the loop does not
//! capture at all: the screen may not yet show the move being applied.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::board::{Occupancy, map_occupancy};
use crate::capture::{FrameSource, extract_cells};
use crate::config::{Config, MoveDelivery, Timings};
use crate::geometry::BoardRect;
use crate::lifecycle::pause;
use crate::orientation::{OrientationResolver, Resolution};
use crate::pool::{ClassifierPool, ClassifyError};
use crate::store::{StateStore, StoreError, keys};
use crate::sync_client::{RemoteSync, ServiceReply};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    WaitingForOrientation,
    Polling,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A move is pending or executing; nothing was captured.
    Paused,
    /// The frame source had nothing this time.
    NoFrame,
    /// Same occupancy as the last acknowledged snapshot; nothing sent.
    Unchanged,
    /// Occupancy was sent; `pending_move` holds the move recorded this cycle, if any.
    Reported { pending_move: Option<String> },
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("classification failed: {0}")]
    Classification(#[from] ClassifyError),
    #[error("decision service unreachable: {0}")]
    Network(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn network(e: anyhow::Error) -> CycleError {
    CycleError::Network(format!("{:#}", e))
}

pub struct PerceptionLoop {
    store: Arc<dyn StateStore>,
    frames: Box<dyn FrameSource>,
    pool: ClassifierPool,
    remote: Arc<dyn RemoteSync>,
    resolver: OrientationResolver,
    board: BoardRect,
    delivery: MoveDelivery,
    fetch_after_report: bool,
    timings: Timings,
    start_sent: bool,
}

impl PerceptionLoop {
    pub fn new(
        config: &Config,
        store: Arc<dyn StateStore>,
        frames: Box<dyn FrameSource>,
        pool: ClassifierPool,
        remote: Arc<dyn RemoteSync>,
    ) -> Result<Self, StoreError> {
        let resolver = OrientationResolver::load(store.as_ref())?;
        Ok(Self {
            store,
            frames,
            pool,
            remote,
            resolver,
            board: config.board,
            delivery: config.delivery,
            fetch_after_report: config.fetch_after_report,
            timings: config.timings.clone(),
            start_sent: false,
        })
    }

    pub fn phase(&self) -> Phase {
        match self.resolver.state() {
            Resolution::Resolved(_) => Phase::Polling,
            Resolution::Unresolved => Phase::WaitingForOrientation,
        }
    }

    /// Runs cycles until `shutdown` fires. Errors only stretch the next delay.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.pool.size(),
            delivery = ?self.delivery,
            warmup = ?self.timings.warmup(),
            "Perception loop starting"
        );
        if let Err(e) = self.store.set_flag(keys::SERVICE_ACTIVE, true) {
            warn!(error = %e, "Failed to mark service active");
        }

        if pause(self.timings.warmup(), &mut shutdown).await {
            loop {
                let delay = match self.run_cycle().await {
                    Ok(outcome) => {
                        debug!(?outcome, phase = ?self.phase(), "Perception cycle done");
                        self.timings.perception_period()
                    }
                    Err(e) => {
                        warn!(error = %e, "Perception cycle failed, backing off");
                        self.timings.perception_backoff()
                    }
                };
                if !pause(delay, &mut shutdown).await {
                    break;
                }
            }
        }

        if let Err(e) = self.store.set_flag(keys::SERVICE_ACTIVE, false) {
            warn!(error = %e, "Failed to mark service inactive");
        }
        info!("Perception loop stopped");
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        if self.move_outstanding()? {
            return Ok(CycleOutcome::Paused);
        }

        let Some(frame) = self
            .frames
            .next_frame()
            .await
            .map_err(|e| CycleError::Capture(format!("{:#}", e)))?
        else {
            return Ok(CycleOutcome::NoFrame);
        };
        let cells =
            extract_cells(&frame, &self.board).map_err(|e| CycleError::Capture(format!("{:#}", e)))?;

        let labels = self.pool.classify(cells).await?;
        let orientation = self.resolver.resolve(&labels, self.store.as_ref())?;
        let occupancy = map_occupancy(&labels, orientation);

        if self.acknowledged_snapshot()?.as_ref() == Some(&occupancy) {
            return Ok(CycleOutcome::Unchanged);
        }

        let start_reply = if self.start_sent {
            None
        } else {
            let bottom = orientation.bottom_side();
            let reply = self.remote.begin_session(bottom).await.map_err(network)?;
            self.start_sent = true;
            info!(side = %bottom, ?reply, "Session start sent");
            Some(reply)
        };

        let reply = self.remote.report_occupancy(&occupancy).await.map_err(network)?;
        info!(
            white = occupancy.side_a.len(),
            black = occupancy.side_b.len(),
            ?reply,
            "Occupancy reported"
        );

        let pending_move = match self.delivery {
            MoveDelivery::Push => {
                let candidate = self.choose_move(reply, start_reply).await?;
                self.record_pending(candidate)?
            }
            MoveDelivery::Pull => None,
        };

        // Acknowledge only after the reply is handled; a failure above keeps the old snapshot
        self.store.set(keys::OCCUPANCY_SIDE_A, &occupancy.stored_side_a())?;
        self.store.set(keys::OCCUPANCY_SIDE_B, &occupancy.stored_side_b())?;
        Ok(CycleOutcome::Reported { pending_move })
    }

    fn move_outstanding(&self) -> Result<bool, StoreError> {
        Ok(self.store.value(keys::PENDING_MOVE)?.is_some() || self.store.flag(keys::MOVE_EXECUTING)?)
    }

    fn acknowledged_snapshot(&self) -> Result<Option<Occupancy>, StoreError> {
        let side_a = self.store.get(keys::OCCUPANCY_SIDE_A)?;
        let side_b = self.store.get(keys::OCCUPANCY_SIDE_B)?;
        if side_a.is_none() && side_b.is_none() {
            return Ok(None);
        }
        Ok(Some(Occupancy::from_stored(
            side_a.as_deref().unwrap_or_default(),
            side_b.as_deref().unwrap_or_default(),
        )))
    }

    /// Report reply first, then the session-start reply, then `/getmove` when the
    /// report came back empty.
    async fn choose_move(
        &self,
        report: ServiceReply,
        start: Option<ServiceReply>,
    ) -> Result<Option<String>, CycleError> {
        if report.is_sentinel() {
            info!(?report, "Service returned no move");
            return Ok(None);
        }
        if let Some(mv) = report.into_move() {
            return Ok(Some(mv));
        }
        if let Some(mv) = start.and_then(ServiceReply::into_move) {
            return Ok(Some(mv));
        }
        if !self.fetch_after_report {
            return Ok(None);
        }
        let fetched = self.remote.fetch_move().await.map_err(network)?;
        if fetched.is_sentinel() {
            info!(reply = ?fetched, "Service returned no move");
        }
        Ok(fetched.into_move())
    }

    fn record_pending(&self, candidate: Option<String>) -> Result<Option<String>, StoreError> {
        let Some(mv) = candidate else {
            return Ok(None);
        };
        if let Some(existing) = self.store.value(keys::PENDING_MOVE)? {
            warn!(existing = %existing, dropped = %mv, "Move already pending, not overwriting");
            return Ok(None);
        }
        self.store.set(keys::PENDING_MOVE, &mv)?;
        info!(mv = %mv, "Pending move recorded");
        Ok(Some(mv))
    }
}
