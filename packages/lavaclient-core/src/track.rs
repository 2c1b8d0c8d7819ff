//! Playable track handles.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::codec::{decode_track, TrackInfo};
use crate::error::{LavaError, LavaResult};

/// Capability for tracks whose playable identifier is resolved lazily.
///
/// Useful for catalog entries (e.g. a playlist export) that only carry
/// metadata until they are about to be played.
#[async_trait]
pub trait PlayableSource: Send + Sync {
    /// Returns the encoded identifier the backend should play.
    async fn resolve(&self, info: &TrackInfo) -> LavaResult<String>;
}

/// A track as held in session queues.
///
/// Cheap to clone. Equality is by [`TrackInfo::identifier`].
#[derive(Clone)]
pub struct Track {
    encoded: Option<String>,
    info: TrackInfo,
    user_data: Option<Value>,
    source: Option<Arc<dyn PlayableSource>>,
}

impl Track {
    /// Wraps an identifier and its already decoded metadata.
    pub fn new(encoded: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            encoded: Some(encoded.into()),
            info,
            user_data: None,
            source: None,
        }
    }

    /// Decodes `encoded` locally to build the track.
    pub fn from_encoded(encoded: impl Into<String>) -> LavaResult<Self> {
        let encoded = encoded.into();
        let record = decode_track(&encoded)?;
        Ok(Self::new(encoded, record.info))
    }

    /// A track that is resolved through `source` right before playback.
    pub fn deferred(info: TrackInfo, source: Arc<dyn PlayableSource>) -> Self {
        Self {
            encoded: None,
            info,
            user_data: None,
            source: Some(source),
        }
    }

    /// Attaches caller data carried alongside the track.
    #[must_use]
    pub fn with_user_data(mut self, data: Value) -> Self {
        self.user_data = Some(data);
        self
    }

    pub fn encoded(&self) -> Option<&str> {
        self.encoded.as_deref()
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    /// Duration in milliseconds.
    pub fn length(&self) -> u64 {
        self.info.length
    }

    pub fn is_stream(&self) -> bool {
        self.info.is_stream
    }

    pub fn user_data(&self) -> Option<&Value> {
        self.user_data.as_ref()
    }

    pub fn is_deferred(&self) -> bool {
        self.encoded.is_none()
    }

    /// Returns the identifier to send to the backend, resolving deferred tracks.
    pub async fn playable_identifier(&self) -> LavaResult<String> {
        if let Some(encoded) = &self.encoded {
            return Ok(encoded.clone());
        }
        match &self.source {
            Some(source) => source
                .resolve(&self.info)
                .await
                .map_err(|e| LavaError::Load(format!("{}: {e}", self.info.identifier))),
            None => Err(LavaError::Load(format!(
                "track {} has neither an identifier nor a source",
                self.info.identifier
            ))),
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.info.identifier == other.info.identifier
    }
}

impl Eq for Track {}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("identifier", &self.info.identifier)
            .field("title", &self.info.title)
            .field("deferred", &self.is_deferred())
            .finish()
    }
}
