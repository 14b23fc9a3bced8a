//! Realtime player-state subscription.
//!
//! `SubscriptionSlot` keeps exactly one live subscription, for the station
//! currently on the dial.  Switching stations aborts the previous forwarder
//! before the next one starts; re-subscribing to the same station is a no-op.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::model::PlayerState;

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerStateEvent {
    /// Subscription opened, first snapshot not there yet.
    Loading,
    /// Current document; `None` when the station has no player state yet.
    Snapshot(Option<PlayerState>),
    Error(String),
}

#[async_trait]
pub trait PlayerStateSource: Send + Sync {
    /// Stream of events for one station.  Dropping the receiver ends the
    /// subscription.
    fn subscribe(&self, station_id: &str) -> mpsc::Receiver<PlayerStateEvent>;

    async fn publish(&self, state: PlayerState) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct SubscriptionSlot {
    active: Option<(String, AbortHandle)>,
}

impl SubscriptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn station_id(&self) -> Option<&str> {
        self.active.as_ref().map(|(id, _)| id.as_str())
    }

    /// Point the slot at `station_id` (or nothing).  Events are wrapped with
    /// the station id and sent to `tx`.  Returns true if a new subscription
    /// was opened.
    pub fn switch_to<T, F>(
        &mut self,
        station_id: Option<&str>,
        source: &dyn PlayerStateSource,
        tx: mpsc::Sender<T>,
        wrap: F,
    ) -> bool
    where
        T: Send + 'static,
        F: Fn(String, PlayerStateEvent) -> T + Send + 'static,
    {
        if self.station_id() == station_id {
            return false;
        }
        self.unsubscribe();

        let Some(station_id) = station_id else {
            return false;
        };

        let mut rx = source.subscribe(station_id);
        let id = station_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(evt) = rx.recv().await {
                if tx.send(wrap(id.clone(), evt)).await.is_err() {
                    break;
                }
            }
        });
        debug!("player-state: subscribed to {}", station_id);
        self.active = Some((station_id.to_string(), task.abort_handle()));
        true
    }

    pub fn unsubscribe(&mut self) {
        if let Some((id, handle)) = self.active.take() {
            handle.abort();
            debug!("player-state: unsubscribed from {}", id);
        }
    }
}

impl Drop for SubscriptionSlot {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
