//! Voting round for one track.
//!
//! ```text
//!   OPEN ──cast_vote──▶ OPEN
//!   OPEN ──lock (deadline or End Vote)──▶ LOCKED ──mark_queued──▶ LOCKED + queued
//! ```
//!
//! A session is never reset.  When the track changes the driver drops it and
//! builds a new one, so tally, lock and winner always go away together.

use rand::RngCore;

use crate::protocol::{Candidate, SessionStatus};
use crate::tally::{Resolution, VoteTally};

/// Result of a `cast_vote` call.  Rejections are ordinary outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOutcome {
    /// Vote counted; carries the candidate's new total.
    Counted(u32),
    /// Voting has closed for this track.
    Locked,
    /// The uri is not one of this round's candidates.
    UnknownCandidate,
    /// No round is running.
    NoSession,
}

#[derive(Debug, Clone)]
pub struct VoteSession {
    generation: u64,
    track_id: String,
    time_bucket: u64,
    candidates: Vec<Candidate>,
    tally: VoteTally,
    locked: bool,
    winner: Option<String>,
    queued: bool,
}

impl VoteSession {
    pub fn new(
        generation: u64,
        track_id: impl Into<String>,
        time_bucket: u64,
        candidates: Vec<Candidate>,
    ) -> Self {
        Self {
            generation,
            track_id: track_id.into(),
            time_bucket,
            candidates,
            tally: VoteTally::new(),
            locked: false,
            winner: None,
            queued: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn time_bucket(&self) -> u64 {
        self.time_bucket
    }

    pub fn set_time_bucket(&mut self, bucket: u64) {
        self.time_bucket = bucket;
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn winner_candidate(&self) -> Option<&Candidate> {
        let uri = self.winner.as_deref()?;
        self.candidates.iter().find(|c| c.uri == uri)
    }

    pub fn status(&self) -> SessionStatus {
        if self.locked {
            SessionStatus::Locked
        } else if self.candidates.is_empty() {
            SessionStatus::NoPlaylist
        } else {
            SessionStatus::Open
        }
    }

    pub fn cast_vote(&mut self, uri: &str) -> CastOutcome {
        if self.locked {
            return CastOutcome::Locked;
        }
        if !self.candidates.iter().any(|c| c.uri == uri) {
            return CastOutcome::UnknownCandidate;
        }
        CastOutcome::Counted(self.tally.increment(uri))
    }

    /// True when the remaining playback time has reached the lock threshold
    /// and this round has not been closed yet.
    pub fn deadline_reached(&self, remaining_ms: u64, lock_time_ms: u64) -> bool {
        !self.locked && !self.queued && remaining_ms <= lock_time_ms
    }

    /// Close voting and resolve the winner.  Returns `None` if already locked,
    /// so resolution runs at most once per session.
    pub fn lock(&mut self, rng: &mut dyn RngCore) -> Option<Resolution> {
        if self.locked {
            return None;
        }
        self.locked = true;
        let resolution = self.tally.resolve(rng);
        if let Resolution::Winner(uri) = &resolution {
            self.winner = Some(uri.clone());
        }
        Some(resolution)
    }

    /// Record that the enqueue step ran.  Returns false if it already had.
    pub fn mark_queued(&mut self) -> bool {
        if self.queued {
            return false;
        }
        self.queued = true;
        true
    }
}
