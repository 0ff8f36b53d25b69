//! Boundary with the external Playback Service.
//!
//! The core only ever talks to playback through [`PlaybackService`].  Every
//! call made by the core is bounded by a timeout; a call that fails or times
//! out is a transient fetch failure and never a track change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::protocol::Track;

/// One poll's observation of the currently playing track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub track: Track,
    pub elapsed_ms: u64,
    /// Absent when playback is not running from a playlist.
    pub playlist_ref: Option<String>,
}

impl Snapshot {
    /// Remaining playback time, floored at zero.
    pub fn remaining_ms(&self) -> u64 {
        self.track.duration_ms.saturating_sub(self.elapsed_ms)
    }

    /// `track_id:bucket` where the bucket advances every `bucket_ms` of playback.
    pub fn time_bucket_key(&self, bucket_ms: u64) -> String {
        format!("{}:{}", self.track.id, self.elapsed_ms / bucket_ms.max(1))
    }
}

/// A track record as listed in a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrack {
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub duration_ms: u64,
    /// `None` when the service does not report playability.
    pub is_playable: Option<bool>,
    pub is_local: bool,
}

impl RawTrack {
    /// Local files cannot be queued remotely.
    pub fn is_local_file(&self) -> bool {
        self.is_local || self.uri.starts_with("spotify:local:")
    }
}

/// One playlist entry.  Removed or unavailable entries carry no track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<RawTrack>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("no active playback device")]
    NoActiveDevice,
    #[error("access token rejected")]
    Unauthorized,
    #[error("playback service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PlaybackService: Send + Sync {
    /// `Ok(None)` when nothing is playing.
    async fn current_snapshot(&self) -> Result<Option<Snapshot>, PlaybackError>;

    async fn playlist_items(&self, playlist_ref: &str) -> Result<Vec<PlaylistItem>, PlaybackError>;

    async fn enqueue(&self, uri: &str) -> Result<(), PlaybackError>;
}

/// Time limits applied to Playback Service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Snapshot polls and enqueue requests.
    pub request: Duration,
    /// Fetching a full playlist listing, which may span several pages.
    pub listing: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_millis(900),
            listing: Duration::from_millis(3_000),
        }
    }
}

/// Run a playback call under `limit`, mapping expiry to [`PlaybackError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, PlaybackError>
where
    F: Future<Output = Result<T, PlaybackError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PlaybackError::Timeout(limit)),
    }
}

/// Turns the service's current-playback report into a [`Snapshot`] per tick.
pub struct SnapshotAdapter {
    service: Arc<dyn PlaybackService>,
    timeout: Duration,
}

impl SnapshotAdapter {
    pub fn new(service: Arc<dyn PlaybackService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// `None` both when nothing is playing and when the fetch failed.
    pub async fn poll(&self) -> Option<Snapshot> {
        match bounded(self.timeout, self.service.current_snapshot()).await {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                debug!("poll: no active playback");
                None
            }
            Err(e) => {
                warn!("poll: playback snapshot unavailable: {}", e);
                None
            }
        }
    }
}
