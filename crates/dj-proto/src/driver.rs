//! Session Driver: reconciles each poll against the live voting round.
//!
//! Per tick:
//!   1. poll a snapshot (absent on failure or when nothing plays)
//!   2. on a new track id, build a brand-new `VoteSession` with fresh candidates
//!   3. re-derive display summaries when the time-bucket key moves
//!   4. once remaining time reaches `lock_time_ms`, lock, resolve and enqueue
//!
//! The driver owns the only live session.  Replacement swaps the whole value,
//! so no caller can ever observe a half-reset round.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::VoteConfig;
use crate::dispatcher::{DispatchOutcome, QueueDispatcher};
use crate::playback::{CallTimeouts, PlaybackService, Snapshot, SnapshotAdapter};
use crate::protocol::{format_countdown, CandidateView, SessionStatus, SessionView};
use crate::selector::CandidateSelector;
use crate::session::{CastOutcome, VoteSession};
use crate::tally::Resolution;

pub const NOTICE_QUEUED: &str = "Queued winner!";
pub const NOTICE_NO_VOTES: &str = "No votes were cast.";
pub const GUIDANCE_NO_PLAYBACK: &str =
    "No active playback found. Play a song from a playlist to begin.";
pub const GUIDANCE_NO_PLAYLIST: &str =
    "No playlist found. Start playing a playlist on your device.";

pub struct SessionDriver {
    snapshots: SnapshotAdapter,
    selector: CandidateSelector,
    dispatcher: QueueDispatcher,
    vote: VoteConfig,
    rng: Box<dyn RngCore + Send>,
    session: Option<VoteSession>,
    generations: u64,
    /// Latest successful poll; `None` while playback is absent.
    current: Option<Snapshot>,
    bucket_key: Option<String>,
    now_playing_label: Option<String>,
    notice: Option<String>,
    fresh_notices: Vec<String>,
}

impl SessionDriver {
    pub fn new(service: Arc<dyn PlaybackService>, vote: VoteConfig, timeouts: CallTimeouts) -> Self {
        Self::with_rng(service, vote, timeouts, Box::new(StdRng::from_entropy()))
    }

    pub fn with_rng(
        service: Arc<dyn PlaybackService>,
        vote: VoteConfig,
        timeouts: CallTimeouts,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            snapshots: SnapshotAdapter::new(Arc::clone(&service), timeouts.request),
            selector: CandidateSelector::new(Arc::clone(&service), timeouts.listing, &vote),
            dispatcher: QueueDispatcher::new(service, timeouts.request),
            vote,
            rng,
            session: None,
            generations: 0,
            current: None,
            bucket_key: None,
            now_playing_label: None,
            notice: None,
            fresh_notices: Vec::new(),
        }
    }

    pub fn session(&self) -> Option<&VoteSession> {
        self.session.as_ref()
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    pub async fn tick(&mut self) {
        let Some(snapshot) = self.snapshots.poll().await else {
            // Absent is not a track change: keep the session and its votes.
            self.current = None;
            return;
        };

        let is_new_track = self
            .session
            .as_ref()
            .map_or(true, |s| s.track_id() != snapshot.track.id);
        if is_new_track {
            self.replace_session(&snapshot).await;
        }

        let key = snapshot.time_bucket_key(self.vote.time_bucket_ms);
        if self.bucket_key.as_deref() != Some(key.as_str()) {
            debug!("driver: time bucket {}", key);
            self.now_playing_label = Some(snapshot.track.display_label());
            if let Some(session) = self.session.as_mut() {
                session.set_time_bucket(snapshot.elapsed_ms / self.vote.time_bucket_ms.max(1));
            }
            self.bucket_key = Some(key);
        }

        let remaining_ms = snapshot.remaining_ms();
        let deadline = self
            .session
            .as_ref()
            .is_some_and(|s| s.deadline_reached(remaining_ms, self.vote.lock_time_ms));
        self.current = Some(snapshot);
        if deadline {
            info!("driver: voting deadline reached ({} ms left)", remaining_ms);
            self.resolve_and_dispatch().await;
        }
    }

    /// Count a vote.  Unknown candidates and closed rounds are silently rejected.
    pub fn cast_vote(&mut self, uri: &str) -> CastOutcome {
        let outcome = match self.session.as_mut() {
            Some(session) => session.cast_vote(uri),
            None => CastOutcome::NoSession,
        };
        debug!("driver: vote for {} -> {:?}", uri, outcome);
        outcome
    }

    /// Manual "End Vote": close the round now.  Returns false if there was
    /// nothing open to close.
    pub async fn force_resolve(&mut self) -> bool {
        let open = self
            .session
            .as_ref()
            .is_some_and(|s| !s.is_locked() && !s.is_queued());
        if !open {
            return false;
        }
        info!("driver: vote ended manually");
        self.resolve_and_dispatch().await
    }

    /// Notices raised since the last call, oldest first.
    pub fn drain_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.fresh_notices)
    }

    pub fn view(&self) -> SessionView {
        let session = self.session.as_ref();
        let status = match (&self.current, session) {
            (Some(_), Some(s)) => s.status(),
            _ => SessionStatus::Idle,
        };
        let open = session.is_some_and(|s| !s.is_locked());
        let remaining_vote_ms = match (&self.current, open) {
            (Some(snapshot), true) => snapshot
                .remaining_ms()
                .saturating_sub(self.vote.lock_time_ms),
            _ => 0,
        };
        let guidance = match status {
            SessionStatus::Idle if self.current.is_none() => Some(GUIDANCE_NO_PLAYBACK),
            SessionStatus::NoPlaylist => Some(GUIDANCE_NO_PLAYLIST),
            _ => None,
        };

        SessionView {
            rev: 0,
            session_generation: session.map_or(0, |s| s.generation()),
            status,
            now_playing: self.current.as_ref().map(|s| s.track.clone()),
            now_playing_label: self
                .current
                .as_ref()
                .and(self.now_playing_label.clone()),
            remaining_vote_ms,
            countdown: format_countdown(remaining_vote_ms),
            candidates: session
                .map(|s| s.candidates().iter().map(CandidateView::from).collect())
                .unwrap_or_default(),
            tally: session.filter(|s| !s.is_locked()).map(|s| s.tally().clone()),
            locked: session.is_some_and(|s| s.is_locked()),
            winner: session.and_then(|s| s.winner_candidate().cloned()),
            notice: self.notice.clone(),
            guidance: guidance.map(str::to_string),
        }
    }

    async fn replace_session(&mut self, snapshot: &Snapshot) {
        // The old round is gone the moment a different track is observed.
        self.session = None;
        self.bucket_key = None;

        let candidates = match snapshot.playlist_ref.as_deref() {
            Some(playlist_ref) => {
                match self.selector.select(playlist_ref, &mut *self.rng).await {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        // Retried on the next tick, since no session exists for this track yet.
                        let notice = format!("Could not load playlist: {}", e);
                        if self.notice.as_deref() == Some(notice.as_str()) {
                            debug!("driver: playlist {} still unavailable: {}", playlist_ref, e);
                        } else {
                            warn!("driver: could not load playlist {}: {}", playlist_ref, e);
                            self.raise_notice(notice);
                        }
                        return;
                    }
                }
            }
            None => Vec::new(),
        };

        self.notice = None;
        self.generations += 1;
        info!(
            "driver: new session #{} for track {} ({} candidates)",
            self.generations,
            snapshot.track.id,
            candidates.len()
        );
        self.session = Some(VoteSession::new(
            self.generations,
            snapshot.track.id.clone(),
            snapshot.elapsed_ms / self.vote.time_bucket_ms.max(1),
            candidates,
        ));
    }

    async fn resolve_and_dispatch(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let Some(resolution) = session.lock(&mut *self.rng) else {
            return false;
        };
        // Marked before the call so the winner is enqueued at most once.
        session.mark_queued();

        let notice = match resolution {
            Resolution::NoVotes => {
                info!("driver: voting closed with no votes");
                NOTICE_NO_VOTES.to_string()
            }
            Resolution::Winner(uri) => {
                info!("driver: winner {}", uri);
                match self.dispatcher.enqueue(&uri).await {
                    DispatchOutcome::Queued => NOTICE_QUEUED.to_string(),
                    DispatchOutcome::Failed(reason) => format!("Failed to queue: {}", reason),
                }
            }
        };
        self.raise_notice(notice);
        true
    }

    fn raise_notice(&mut self, notice: String) {
        self.fresh_notices.push(notice.clone());
        self.notice = Some(notice);
    }
}
