use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;
use crate::playback::CallTimeouts;

/// Environment variable that overrides `spotify.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "DJ_ACCESS_TOKEN";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("vote.candidate_count must be at least 1")]
    NoCandidates,
    #[error("vote.time_bucket_ms must be greater than zero")]
    ZeroTimeBucket,
    #[error("vote.tick_interval_ms must be greater than zero")]
    ZeroTickInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub vote: VoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection settings for the Spotify Web API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bearer token. Acquiring and refreshing it is left to the operator.
    #[serde(default)]
    pub access_token: String,
    /// Upper bound for snapshot and enqueue calls; keep it below the tick interval.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound for fetching a whole (paged) playlist listing.
    #[serde(default = "default_listing_timeout_ms")]
    pub listing_timeout_ms: u64,
    #[serde(default = "default_playlist_page_limit")]
    pub playlist_page_limit: u32,
}

/// Tunables of the voting round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteConfig {
    /// Voting closes once remaining playback time drops to this value.
    #[serde(default = "default_lock_time_ms")]
    pub lock_time_ms: u64,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    #[serde(default = "default_time_bucket_ms")]
    pub time_bucket_ms: u64,
    /// Tracks shorter than this never become candidates.
    #[serde(default = "default_min_candidate_ms")]
    pub min_candidate_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            access_token: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            listing_timeout_ms: default_listing_timeout_ms(),
            playlist_page_limit: default_playlist_page_limit(),
        }
    }
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            lock_time_ms: default_lock_time_ms(),
            candidate_count: default_candidate_count(),
            time_bucket_ms: default_time_bucket_ms(),
            min_candidate_ms: default_min_candidate_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl SpotifyConfig {
    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            request: Duration::from_millis(self.request_timeout_ms),
            listing: Duration::from_millis(self.listing_timeout_ms),
        }
    }

    /// Token from the environment if set, otherwise the configured one.
    pub fn resolved_token(&self) -> String {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.access_token.clone())
    }
}

impl VoteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidate_count == 0 {
            return Err(ConfigError::NoCandidates);
        }
        if self.time_bucket_ms == 0 {
            return Err(ConfigError::ZeroTimeBucket);
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    900
}

fn default_listing_timeout_ms() -> u64 {
    3_000
}

fn default_playlist_page_limit() -> u32 {
    100
}

fn default_lock_time_ms() -> u64 {
    20_000
}

fn default_candidate_count() -> usize {
    4
}

fn default_time_bucket_ms() -> u64 {
    10_000
}

fn default_min_candidate_ms() -> u64 {
    30_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

impl Config {
    /// Load the config file, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.vote.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
