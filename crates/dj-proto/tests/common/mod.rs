//! In-memory Playback Service used by the driver scenarios.

#![allow(dead_code)]

use async_trait::async_trait;
use dj_proto::config::VoteConfig;
use dj_proto::driver::SessionDriver;
use dj_proto::playback::{CallTimeouts, PlaybackError, PlaybackService, PlaylistItem, RawTrack, Snapshot};
use dj_proto::protocol::Track;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PLAYLIST: &str = "37i9dQZF1DXcBWIGoYBM5M";

pub struct FakePlayback {
    snapshot: Mutex<Result<Option<Snapshot>, PlaybackError>>,
    listing: Mutex<Result<Vec<PlaylistItem>, PlaybackError>>,
    enqueue_result: Mutex<Result<(), PlaybackError>>,
    enqueued: Mutex<Vec<String>>,
    listing_calls: AtomicUsize,
    listing_delay: Mutex<Option<Duration>>,
    enqueue_delay: Mutex<Option<Duration>>,
}

impl FakePlayback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Ok(None)),
            listing: Mutex::new(Ok(listing(6))),
            enqueue_result: Mutex::new(Ok(())),
            enqueued: Mutex::new(Vec::new()),
            listing_calls: AtomicUsize::new(0),
            listing_delay: Mutex::new(None),
            enqueue_delay: Mutex::new(None),
        })
    }

    pub fn play(&self, snapshot: Snapshot) {
        *self.snapshot.lock().unwrap() = Ok(Some(snapshot));
    }

    pub fn stop(&self) {
        *self.snapshot.lock().unwrap() = Ok(None);
    }

    pub fn fail_polls(&self) {
        *self.snapshot.lock().unwrap() = Err(PlaybackError::Transport("connection reset".into()));
    }

    pub fn set_listing(&self, items: Result<Vec<PlaylistItem>, PlaybackError>) {
        *self.listing.lock().unwrap() = items;
    }

    pub fn set_enqueue_result(&self, result: Result<(), PlaybackError>) {
        *self.enqueue_result.lock().unwrap() = result;
    }

    /// Make every listing call hang for `delay` before answering.
    pub fn stall_listing(&self, delay: Option<Duration>) {
        *self.listing_delay.lock().unwrap() = delay;
    }

    /// Make every enqueue call hang for `delay` after recording the attempt.
    pub fn stall_enqueue(&self, delay: Option<Duration>) {
        *self.enqueue_delay.lock().unwrap() = delay;
    }

    pub fn enqueued(&self) -> Vec<String> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackService for FakePlayback {
    async fn current_snapshot(&self) -> Result<Option<Snapshot>, PlaybackError> {
        self.snapshot.lock().unwrap().clone()
    }

    async fn playlist_items(&self, _playlist_ref: &str) -> Result<Vec<PlaylistItem>, PlaybackError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.listing_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.listing.lock().unwrap().clone()
    }

    async fn enqueue(&self, uri: &str) -> Result<(), PlaybackError> {
        self.enqueued.lock().unwrap().push(uri.to_string());
        let delay = *self.enqueue_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.enqueue_result.lock().unwrap().clone()
    }
}

pub fn listing(n: usize) -> Vec<PlaylistItem> {
    (0..n)
        .map(|i| PlaylistItem {
            track: Some(RawTrack {
                uri: format!("spotify:track:cand{}", i),
                name: format!("Candidate {}", i),
                artist: "Artist".to_string(),
                duration_ms: 180_000,
                is_playable: Some(true),
                is_local: false,
            }),
        })
        .collect()
}

pub fn snapshot(id: &str, duration_ms: u64, elapsed_ms: u64) -> Snapshot {
    Snapshot {
        track: Track {
            id: id.to_string(),
            name: format!("Track {}", id),
            artist: "Someone".to_string(),
            album_art: Some(format!("https://i.scdn.co/image/{}", id)),
            duration_ms,
        },
        elapsed_ms,
        playlist_ref: Some(PLAYLIST.to_string()),
    }
}

pub fn driver(service: &Arc<FakePlayback>, seed: u64) -> SessionDriver {
    let service: Arc<dyn PlaybackService> = service.clone();
    SessionDriver::with_rng(
        service,
        VoteConfig::default(),
        CallTimeouts::default(),
        Box::new(StdRng::seed_from_u64(seed)),
    )
}
