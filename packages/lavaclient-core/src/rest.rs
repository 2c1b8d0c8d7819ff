//! Request/response calls to an instance: loading and decoding tracks.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::TrackInfo;
use crate::config::InstanceConfig;
use crate::error::{LavaError, LavaResult};
use crate::protocol::TrackException;
use crate::protocol_constants::{HEADER_AUTHORIZATION, HTTP_TIMEOUT_SECS};
use crate::track::Track;

// ─────────────────────────────────────────────────────────────────────────────
// Load results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    #[serde(default)]
    pub name: String,
    /// Index of the highlighted track, -1 when none.
    #[serde(default = "no_selection")]
    pub selected_track: i64,
}

fn no_selection() -> i64 {
    -1
}

impl PlaylistInfo {
    pub fn selected(&self) -> Option<usize> {
        usize::try_from(self.selected_track).ok()
    }
}

/// Outcome of a track lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult {
    Track(Track),
    Playlist {
        info: PlaylistInfo,
        tracks: Vec<Track>,
    },
    Search(Vec<Track>),
    NoMatches,
    LoadFailed {
        message: String,
        severity: String,
    },
}

impl LoadResult {
    pub fn tracks(&self) -> &[Track] {
        match self {
            Self::Track(track) => std::slice::from_ref(track),
            Self::Playlist { tracks, .. } | Self::Search(tracks) => tracks,
            Self::NoMatches | Self::LoadFailed { .. } => &[],
        }
    }

    /// Parses a `loadtracks` response body.
    pub fn from_json(body: &str) -> LavaResult<Self> {
        let raw: RawLoadResult = serde_json::from_str(body)?;
        raw.try_into()
    }
}

#[derive(Deserialize)]
struct RawTrack {
    #[serde(alias = "track")]
    encoded: String,
    info: TrackInfo,
}

impl From<RawTrack> for Track {
    fn from(raw: RawTrack) -> Self {
        Track::new(raw.encoded, raw.info)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadResult {
    load_type: String,
    #[serde(default)]
    playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    tracks: Vec<RawTrack>,
    #[serde(default)]
    exception: Option<TrackException>,
}

impl TryFrom<RawLoadResult> for LoadResult {
    type Error = LavaError;

    fn try_from(raw: RawLoadResult) -> LavaResult<Self> {
        let mut tracks: Vec<Track> = raw.tracks.into_iter().map(Track::from).collect();
        let result = match raw.load_type.to_ascii_uppercase().as_str() {
            "TRACK_LOADED" => {
                if tracks.is_empty() {
                    Self::NoMatches
                } else {
                    Self::Track(tracks.swap_remove(0))
                }
            }
            "PLAYLIST_LOADED" => Self::Playlist {
                info: raw.playlist_info.unwrap_or(PlaylistInfo {
                    name: String::new(),
                    selected_track: -1,
                }),
                tracks,
            },
            "SEARCH_RESULT" => Self::Search(tracks),
            "NO_MATCHES" => Self::NoMatches,
            "LOAD_FAILED" => {
                let exception = raw.exception.unwrap_or(TrackException {
                    message: None,
                    severity: "UNKNOWN".to_string(),
                    cause: String::new(),
                });
                Self::LoadFailed {
                    message: exception.message.unwrap_or_default(),
                    severity: exception.severity,
                }
            }
            other => {
                return Err(LavaError::Codec(format!("unknown loadType {other}")));
            }
        };
        Ok(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Seams
// ─────────────────────────────────────────────────────────────────────────────

/// A custom search source consulted before any instance.
#[async_trait]
pub trait TrackSource: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` when the query is not for this source.
    async fn load_item(&self, query: &str) -> LavaResult<Option<LoadResult>>;
}

/// Loads and decodes tracks through an instance.
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load_tracks(&self, query: &str) -> LavaResult<LoadResult>;

    async fn decode_track(&self, encoded: &str) -> LavaResult<TrackInfo>;

    async fn decode_tracks(&self, encoded: &[String]) -> LavaResult<Vec<Track>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// [`TrackLoader`] over the instance's HTTP endpoints.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    instance: String,
    base: String,
    password: String,
}

impl RestClient {
    pub fn new(http: Client, config: &InstanceConfig) -> Self {
        Self {
            http,
            instance: config.name.clone(),
            base: config.http_url(),
            password: config.password.clone(),
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> LavaResult<Url> {
        Url::parse_with_params(&format!("{}{}", self.base, path), params)
            .map_err(|e| LavaError::Http(format!("invalid url for {}: {e}", self.instance)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> LavaResult<T> {
        log::debug!("[Rest:{}] GET {}", self.instance, url.path());
        let response = self
            .http
            .get(url)
            .header(HEADER_AUTHORIZATION, &self.password)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> LavaResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LavaError::Http(format!("HTTP {}: {}", status.as_u16(), body)));
    }
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl TrackLoader for RestClient {
    async fn load_tracks(&self, query: &str) -> LavaResult<LoadResult> {
        let url = self.url("/loadtracks", &[("identifier", query)])?;
        let raw: RawLoadResult = self.get_json(url).await?;
        raw.try_into()
    }

    async fn decode_track(&self, encoded: &str) -> LavaResult<TrackInfo> {
        let url = self.url("/decodetrack", &[("track", encoded)])?;
        self.get_json(url).await
    }

    async fn decode_tracks(&self, encoded: &[String]) -> LavaResult<Vec<Track>> {
        let url = self.url("/decodetracks", &[])?;
        log::debug!(
            "[Rest:{}] POST {} ({} identifiers)",
            self.instance,
            url.path(),
            encoded.len()
        );
        let response = self
            .http
            .post(url)
            .header(HEADER_AUTHORIZATION, &self.password)
            .json(encoded)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await?;
        let raw: Vec<RawTrack> = read_json(response).await?;
        Ok(raw.into_iter().map(Track::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_info;
    use serde_json::json;

    fn track_json(id: &str) -> serde_json::Value {
        json!({"encoded": format!("enc-{id}"), "info": sample_info(id)})
    }

    #[test]
    fn parses_playlist_with_selection() {
        let body = json!({
            "loadType": "PLAYLIST_LOADED",
            "playlistInfo": {"name": "Mix", "selectedTrack": 1},
            "tracks": [track_json("a"), track_json("b")],
        });
        let result = LoadResult::from_json(&body.to_string()).unwrap();
        let LoadResult::Playlist { info, tracks } = &result else {
            panic!("expected playlist, got {result:?}");
        };
        assert_eq!(info.name, "Mix");
        assert_eq!(info.selected(), Some(1));
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].encoded(), Some("enc-b"));
    }

    #[test]
    fn single_track_and_legacy_track_key() {
        let body = json!({
            "loadType": "TRACK_LOADED",
            "playlistInfo": {},
            "tracks": [{"track": "enc-x", "info": sample_info("x")}],
        });
        let result = LoadResult::from_json(&body.to_string()).unwrap();
        assert!(matches!(&result, LoadResult::Track(track) if track.identifier() == "x"));
        assert_eq!(result.tracks().len(), 1);
    }

    #[test]
    fn failures_and_empty_results() {
        let failed = json!({
            "loadType": "LOAD_FAILED",
            "exception": {"message": "blocked", "severity": "COMMON"},
        });
        assert_eq!(
            LoadResult::from_json(&failed.to_string()).unwrap(),
            LoadResult::LoadFailed {
                message: "blocked".into(),
                severity: "COMMON".into()
            }
        );

        let empty = json!({"loadType": "NO_MATCHES", "tracks": []});
        let result = LoadResult::from_json(&empty.to_string()).unwrap();
        assert_eq!(result, LoadResult::NoMatches);
        assert!(result.tracks().is_empty());

        let unknown = json!({"loadType": "SOMETHING"});
        assert!(matches!(
            LoadResult::from_json(&unknown.to_string()),
            Err(LavaError::Codec(_))
        ));
    }

    #[test]
    fn data_envelope_responses_are_rejected() {
        let track = json!({
            "loadType": "track",
            "data": {"encoded": "QAAA", "info": {"title": "x"}},
        });
        assert!(matches!(
            LoadResult::from_json(&track.to_string()),
            Err(LavaError::Codec(_))
        ));

        let empty = json!({"loadType": "empty", "data": {}});
        assert!(matches!(
            LoadResult::from_json(&empty.to_string()),
            Err(LavaError::Codec(_))
        ));
    }

    #[test]
    fn query_is_url_encoded() {
        let client = RestClient::new(
            Client::new(),
            &InstanceConfig::new("a", "node.local", 2333, "pw"),
        );
        let url = client
            .url("/loadtracks", &[("identifier", "ytsearch:never gonna & give")])
            .unwrap();
        assert_eq!(url.host_str(), Some("node.local"));
        assert_eq!(url.path(), "/loadtracks");
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "identifier");
        assert_eq!(value, "ytsearch:never gonna & give");
    }
}
