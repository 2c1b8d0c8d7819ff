//! Message shapes of the persistent channel.
//!
//! Every message is one JSON object keyed by `op`. The channel itself only
//! parses the [`Envelope`]; typed decoding of payloads happens in the
//! dispatcher so a malformed payload only loses that one message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LavaError, LavaResult};
use crate::stats::StatsSnapshot;

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Commands sent to an instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outbound {
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: Value,
    },
    Play {
        guild_id: String,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        no_replace: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pause: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<u16>,
    },
    Stop {
        guild_id: String,
    },
    Pause {
        guild_id: String,
        pause: bool,
    },
    Seek {
        guild_id: String,
        position: u64,
    },
    Volume {
        guild_id: String,
        volume: u16,
    },
    Filters {
        guild_id: String,
        #[serde(flatten)]
        filters: Map<String, Value>,
    },
    Destroy {
        guild_id: String,
    },
    ConfigureResuming {
        key: String,
        timeout: u64,
    },
}

impl Outbound {
    /// Wire name of the op, for logging.
    pub fn op(&self) -> &'static str {
        match self {
            Self::VoiceUpdate { .. } => "voiceUpdate",
            Self::Play { .. } => "play",
            Self::Stop { .. } => "stop",
            Self::Pause { .. } => "pause",
            Self::Seek { .. } => "seek",
            Self::Volume { .. } => "volume",
            Self::Filters { .. } => "filters",
            Self::Destroy { .. } => "destroy",
            Self::ConfigureResuming { .. } => "configureResuming",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Op name and raw payload of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub op: String,
    pub payload: Value,
}

impl Envelope {
    /// Parses the outer object and its `op` discriminator only.
    pub fn parse(text: &str) -> LavaResult<Self> {
        let payload: Value = serde_json::from_str(text)?;
        let op = payload
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| LavaError::Codec("message has no op field".to_string()))?
            .to_string();
        Ok(Self { op, payload })
    }

    /// Decodes the payload into a typed [`Inbound`] message.
    pub fn decode(&self) -> LavaResult<Inbound> {
        let inbound = match self.op.as_str() {
            "ready" => Inbound::Ready(Ready::deserialize(&self.payload)?),
            "stats" => Inbound::Stats(StatsSnapshot::deserialize(&self.payload)?),
            "playerUpdate" => Inbound::PlayerUpdate(PlayerUpdate::deserialize(&self.payload)?),
            "event" => Inbound::Event(TrackEvent::deserialize(&self.payload)?),
            _ => Inbound::Unknown(self.op.clone()),
        };
        Ok(inbound)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ready(Ready),
    Stats(StatsSnapshot),
    PlayerUpdate(PlayerUpdate),
    Event(TrackEvent),
    /// Ops this client does not understand; ignored.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    #[serde(default)]
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Backend wall clock in Unix milliseconds.
    pub time: u64,
    /// Track position in milliseconds.
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub cause: String,
}

/// Track and voice events pushed with the `event` op.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum TrackEvent {
    #[serde(rename = "TrackStartEvent")]
    TrackStart { guild_id: String, track: String },
    #[serde(rename = "TrackEndEvent")]
    TrackEnd {
        guild_id: String,
        track: String,
        reason: EndReason,
    },
    #[serde(rename = "TrackExceptionEvent")]
    TrackException {
        guild_id: String,
        track: String,
        exception: TrackException,
    },
    #[serde(rename = "TrackStuckEvent")]
    TrackStuck {
        guild_id: String,
        track: String,
        threshold_ms: u64,
    },
    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed {
        guild_id: String,
        code: u16,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        by_remote: bool,
    },
}

impl TrackEvent {
    pub fn guild_id(&self) -> &str {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => guild_id,
        }
    }
}

/// Why a track stopped playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
    Other(String),
}

impl EndReason {
    /// Whether the next queued track should start automatically.
    pub fn may_start_next(&self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

impl FromStr for EndReason {
    type Err = std::convert::Infallible;

    /// Accepts both `LOAD_FAILED` and `loadFailed` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Ok(match normalized.as_str() {
            "finished" => Self::Finished,
            "loadfailed" => Self::LoadFailed,
            "stopped" => Self::Stopped,
            "replaced" => Self::Replaced,
            "cleanup" => Self::Cleanup,
            _ => Self::Other(s.to_string()),
        })
    }
}

impl From<String> for EndReason {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(reason) => reason,
            Err(never) => match never {},
        }
    }
}

impl From<EndReason> for String {
    fn from(reason: EndReason) -> Self {
        reason.to_string()
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Finished => "finished",
            Self::LoadFailed => "loadFailed",
            Self::Stopped => "stopped",
            Self::Replaced => "replaced",
            Self::Cleanup => "cleanup",
            Self::Other(other) => other,
        };
        f.write_str(name)
    }
}
