use crate::protocol::SessionView;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest published view.  Only the core loop writes; everyone else clones.
pub struct StateManager {
    state: Arc<RwLock<SessionView>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionView {
                rev: 1,
                ..SessionView::default()
            })),
        }
    }

    pub async fn get_state(&self) -> SessionView {
        self.state.read().await.clone()
    }

    /// Replace the view wholesale, bumping `rev`.  Returns the new revision.
    pub async fn publish(&self, mut view: SessionView) -> u64 {
        let mut state = self.state.write().await;
        view.rev = state.rev + 1;
        *state = view;
        state.rev
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
