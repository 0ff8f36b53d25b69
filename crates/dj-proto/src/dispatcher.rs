//! Queue Dispatcher: hands the resolved winner to the Playback Service, once.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::playback::{bounded, PlaybackService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    Failed(String),
}

/// Appends winners to the playback queue.  Never retries: a failed call may
/// still have reached the service, and a second attempt could queue twice.
pub struct QueueDispatcher {
    service: Arc<dyn PlaybackService>,
    timeout: Duration,
}

impl QueueDispatcher {
    pub fn new(service: Arc<dyn PlaybackService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn enqueue(&self, uri: &str) -> DispatchOutcome {
        match bounded(self.timeout, self.service.enqueue(uri)).await {
            Ok(()) => {
                info!("dispatch: queued {}", uri);
                DispatchOutcome::Queued
            }
            Err(e) => {
                warn!("dispatch: failed to queue {}: {}", uri, e);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}
