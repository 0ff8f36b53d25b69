//! Candidate selection from the active playlist.

use rand::RngCore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::VoteConfig;
use crate::playback::{bounded, PlaybackError, PlaybackService, PlaylistItem, RawTrack};
use crate::protocol::Candidate;

pub struct CandidateSelector {
    service: Arc<dyn PlaybackService>,
    timeout: Duration,
    count: usize,
    min_duration_ms: u64,
}

impl CandidateSelector {
    pub fn new(service: Arc<dyn PlaybackService>, timeout: Duration, vote: &VoteConfig) -> Self {
        Self {
            service,
            timeout,
            count: vote.candidate_count,
            min_duration_ms: vote.min_candidate_ms,
        }
    }

    /// Fetch the playlist listing and draw a fresh candidate set from it.
    pub async fn select(
        &self,
        playlist_ref: &str,
        rng: &mut (dyn RngCore + Send),
    ) -> Result<Vec<Candidate>, PlaybackError> {
        let items = bounded(self.timeout, self.service.playlist_items(playlist_ref)).await?;
        let candidates = sample_candidates(&items, self.count, self.min_duration_ms, rng);
        debug!(
            "selector: {} of {} playlist items drawn from {}",
            candidates.len(),
            items.len(),
            playlist_ref
        );
        Ok(candidates)
    }
}

/// Whether a listed track may be offered for voting.
pub fn is_eligible(track: &RawTrack, min_duration_ms: u64) -> bool {
    track.is_playable.unwrap_or(true)
        && !track.is_local_file()
        && track.duration_ms >= min_duration_ms
}

/// Draw up to `k` distinct eligible tracks uniformly at random, without replacement.
pub fn sample_candidates(
    items: &[PlaylistItem],
    k: usize,
    min_duration_ms: u64,
    rng: &mut dyn RngCore,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let eligible: Vec<&RawTrack> = items
        .iter()
        .filter_map(|item| item.track.as_ref())
        .filter(|track| is_eligible(track, min_duration_ms))
        .filter(|track| seen.insert(track.uri.as_str()))
        .collect();

    let amount = k.min(eligible.len());
    rand::seq::index::sample(rng, eligible.len(), amount)
        .into_iter()
        .map(|idx| {
            let track = eligible[idx];
            Candidate {
                uri: track.uri.clone(),
                name: track.name.clone(),
                artist: track.artist.clone(),
            }
        })
        .collect()
}
