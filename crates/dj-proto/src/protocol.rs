use serde::{Deserialize, Serialize};

use crate::tally::VoteTally;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect.
pub const PROTOCOL_VERSION: u32 = 1;

const TRACK_NAME_MAX: usize = 30;
const ARTIST_NAME_MAX: usize = 20;

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    CastVote { uri: String },
    /// Manual "End Vote": lock and resolve now instead of waiting for the deadline.
    ForceResolve,
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full view.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: SessionView,
    },
    State {
        data: SessionView,
    },
    Notice {
        message: String,
    },
    Log {
        message: String,
    },
}

/// What is playing right now, as reported by one poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album_art: Option<String>,
    pub duration_ms: u64,
}

impl Track {
    /// "Name by Artist", truncated for display.
    pub fn display_label(&self) -> String {
        format!(
            "{} by {}",
            truncate(&self.name, TRACK_NAME_MAX),
            truncate(&self.artist, ARTIST_NAME_MAX)
        )
    }
}

/// A track offered as a voteable option.  `uri` is the tally key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub uri: String,
    pub name: String,
    pub artist: String,
}

impl Candidate {
    pub fn label(&self) -> String {
        format!(
            "{} \u{2013} {}",
            truncate(&self.name, TRACK_NAME_MAX),
            truncate(&self.artist, ARTIST_NAME_MAX)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateView {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub label: String,
}

impl From<&Candidate> for CandidateView {
    fn from(candidate: &Candidate) -> Self {
        Self {
            label: candidate.label(),
            candidate: candidate.clone(),
        }
    }
}

/// Coarse state of the voting round as shown to participants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No track has been observed yet, or playback is currently absent.
    #[default]
    Idle,
    /// A track is playing but it offers nothing to vote on.
    NoPlaylist,
    Open,
    Locked,
}

/// Read-only view exposed to the presentation surface after every tick.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionView {
    /// Monotonic revision counter, bumped on every publish.
    #[serde(default)]
    pub rev: u64,
    /// Identity of the live session; changes only on replacement.
    pub session_generation: u64,
    pub status: SessionStatus,
    pub now_playing: Option<Track>,
    pub now_playing_label: Option<String>,
    pub remaining_vote_ms: u64,
    pub countdown: String,
    pub candidates: Vec<CandidateView>,
    /// Only present while voting is open.
    pub tally: Option<VoteTally>,
    pub locked: bool,
    pub winner: Option<Candidate>,
    pub notice: Option<String>,
    pub guidance: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

/// Shorten `text` to at most `max_len` characters, ending in "..." when cut.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Render milliseconds as `m:ss`.
pub fn format_countdown(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}
