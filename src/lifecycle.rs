//! Session lifecycle: shutdown signalling for the loops, cancellable sleeps,
//! session reset and a dump of the shared keys.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::store::{StateStore, StoreResult, keys};

/// Owner side of the stop signal shared by both loops.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub fn stop_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Sleeps for `delay` unless a stop arrives first. Returns `false` on stop.
/// A dropped sender counts as a stop.
pub async fn pause(delay: Duration, rx: &mut watch::Receiver<bool>) -> bool {
    if stop_requested(rx) {
        return false;
    }
    let stopped = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = rx.wait_for(|stop| *stop) => true,
    };
    !stopped && !stop_requested(rx)
}

/// Clears every shared key. Run before either loop polls a new session.
pub fn reset_session(store: &dyn StateStore) -> StoreResult<()> {
    store.clear()?;
    info!("Session state cleared");
    Ok(())
}

/// Current value of every shared key, in a fixed order.
pub fn snapshot(store: &dyn StateStore) -> StoreResult<Vec<(&'static str, Option<String>)>> {
    keys::ALL
        .iter()
        .map(|&key| Ok((key, store.get(key)?)))
        .collect()
}
