/// Spotify Web API implementation of the Playback Service.
///
/// Three endpoints are used:
///
/// ```text
///   GET  /me/player                    → current track, progress, context
///   GET  /playlists/{id}/tracks        → paged listing, followed via `next`
///   POST /me/player/queue?uri=...      → append to the playback queue
/// ```
///
/// The bearer token is supplied by configuration; obtaining and refreshing it
/// is the operator's job.
use async_trait::async_trait;
use dj_proto::config::SpotifyConfig;
use dj_proto::playback::{PlaybackError, PlaybackService, PlaylistItem, RawTrack, Snapshot};
use dj_proto::protocol::Track;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

// ── wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlayerBody {
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    item: Option<ApiTrack>,
    #[serde(default)]
    context: Option<ApiContext>,
}

#[derive(Debug, Deserialize)]
struct ApiContext {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    album: Option<ApiAlbum>,
    #[serde(default)]
    is_playable: Option<bool>,
    #[serde(default)]
    is_local: bool,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<ApiPlaylistItem>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylistItem {
    #[serde(default)]
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

impl ApiTrack {
    fn first_artist(&self) -> String {
        self.artists
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_default()
    }

    fn into_raw(self) -> RawTrack {
        let artist = self.first_artist();
        RawTrack {
            uri: self.uri,
            name: self.name,
            artist,
            duration_ms: self.duration_ms,
            is_playable: self.is_playable,
            is_local: self.is_local,
        }
    }
}

// ── parsing ───────────────────────────────────────────────────────────────────

/// Map a `/me/player` body to a snapshot.  No item means nothing is playing.
fn snapshot_from_player(body: PlayerBody) -> Option<Snapshot> {
    let item = body.item?;
    let artist = item.first_artist();
    let album_art = item
        .album
        .and_then(|a| a.images.into_iter().next())
        .map(|img| img.url);
    // Local files have no id; their uri is the only stable identity.
    let id = item.id.unwrap_or(item.uri);
    let playlist_ref = body
        .context
        .filter(|c| c.kind == "playlist")
        .and_then(|c| c.uri.rsplit(':').next().map(str::to_string));

    Some(Snapshot {
        track: Track {
            id,
            name: item.name,
            artist,
            album_art,
            duration_ms: item.duration_ms,
        },
        elapsed_ms: body.progress_ms.unwrap_or(0),
        playlist_ref,
    })
}

fn items_from_page(page: PlaylistPage) -> (Vec<PlaylistItem>, Option<String>) {
    let items = page
        .items
        .into_iter()
        .map(|item| PlaylistItem {
            track: item.track.map(ApiTrack::into_raw),
        })
        .collect();
    (items, page.next)
}

// ── client ────────────────────────────────────────────────────────────────────

pub struct SpotifyClient {
    client: Client,
    api_base: String,
    token: String,
    page_limit: u32,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("democratic-dj/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let token = config.resolved_token();
        if token.is_empty() {
            warn!("spotify: no access token configured; every call will be rejected");
        }
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            page_limit: config.playlist_page_limit.clamp(1, 100),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PlaybackError> {
        request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, PlaybackError> {
        response
            .json::<T>()
            .await
            .map_err(|e| PlaybackError::Decode(e.to_string()))
    }
}

/// Turn a non-success response into a typed error.
async fn error_for(response: Response) -> PlaybackError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .map(|b| b.error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
    match status {
        StatusCode::UNAUTHORIZED => PlaybackError::Unauthorized,
        StatusCode::NOT_FOUND if message.to_ascii_lowercase().contains("device") => {
            PlaybackError::NoActiveDevice
        }
        _ => PlaybackError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl PlaybackService for SpotifyClient {
    async fn current_snapshot(&self) -> Result<Option<Snapshot>, PlaybackError> {
        let url = format!("{}/me/player", self.api_base);
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        let body: PlayerBody = Self::json(response).await?;
        Ok(snapshot_from_player(body))
    }

    async fn playlist_items(&self, playlist_ref: &str) -> Result<Vec<PlaylistItem>, PlaybackError> {
        let mut items = Vec::new();
        let mut next = Some(format!(
            "{}/playlists/{}/tracks?limit={}&additional_types=track",
            self.api_base, playlist_ref, self.page_limit
        ));

        while let Some(url) = next.take() {
            let response = self.send(self.client.get(&url)).await?;
            if !response.status().is_success() {
                return Err(error_for(response).await);
            }
            let page: PlaylistPage = Self::json(response).await?;
            let (page_items, page_next) = items_from_page(page);
            items.extend(page_items);
            next = page_next;
        }

        debug!("spotify: playlist {} has {} items", playlist_ref, items.len());
        Ok(items)
    }

    async fn enqueue(&self, uri: &str) -> Result<(), PlaybackError> {
        let url = format!("{}/me/player/queue", self.api_base);
        let response = self
            .send(self.client.post(&url).query(&[("uri", uri)]).header(
                reqwest::header::CONTENT_LENGTH,
                "0",
            ))
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }
}
