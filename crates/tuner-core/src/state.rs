use crate::protocol::TunerState;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The published snapshot.  The core loop is the only writer; socket and
/// HTTP handlers read clones.
pub struct StateManager {
    state: Arc<RwLock<TunerState>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TunerState::default())),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<TunerState>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> TunerState {
        self.state.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.state.read().await.rev
    }

    /// Replace the snapshot; `rev` continues from the previous one.
    pub async fn publish(&self, mut snapshot: TunerState) -> u64 {
        let mut state = self.state.write().await;
        snapshot.rev = state.rev + 1;
        *state = snapshot;
        state.rev
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
