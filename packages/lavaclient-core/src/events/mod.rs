//! Event system for observers of instances and sessions.
//!
//! This module provides:
//! - [`EventEmitter`] trait for components to emit events
//! - [`BroadcastEventBridge`] fanning events out to subscribers and observers
//! - The closed [`LavaEvent`] type and its per-domain variants

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::protocol::{EndReason, TrackException};
use crate::stats::StatsSnapshot;

/// Every event observable from outside the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum LavaEvent {
    /// Connection lifecycle and statistics of one backend instance.
    Instance(InstanceEvent),

    /// Playback occurrences of one session.
    Player(PlayerEvent),
}

/// Events about a backend instance.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InstanceEvent {
    /// The channel handshake succeeded.
    Connected { instance: String, timestamp: u64 },
    /// The backend confirmed the session, possibly resuming a previous one.
    Ready {
        instance: String,
        resumed: bool,
        timestamp: u64,
    },
    /// The channel closed. A reconnect is scheduled unless it was a shutdown.
    Disconnected {
        instance: String,
        code: Option<u16>,
        reason: String,
        timestamp: u64,
    },
    /// Server-side session state is gone; assigned sessions are being moved.
    Lost { instance: String, timestamp: u64 },
    /// The backend rejected the credential. The instance stays unusable.
    AuthenticationFailed {
        instance: String,
        status: u16,
        timestamp: u64,
    },
    /// Reconnect attempts were exhausted.
    GaveUp {
        instance: String,
        attempts: u32,
        timestamp: u64,
    },
    Stats {
        instance: String,
        stats: StatsSnapshot,
        penalty: f64,
        timestamp: u64,
    },
    Removed { instance: String, timestamp: u64 },
}

/// Events about a playback session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlayerEvent {
    TrackStart {
        guild_id: String,
        track: String,
        timestamp: u64,
    },
    TrackEnd {
        guild_id: String,
        track: String,
        reason: EndReason,
        timestamp: u64,
    },
    TrackException {
        guild_id: String,
        track: String,
        exception: TrackException,
        timestamp: u64,
    },
    TrackStuck {
        guild_id: String,
        track: String,
        threshold_ms: u64,
        timestamp: u64,
    },
    /// Position report pushed by the backend.
    PlayerUpdate {
        guild_id: String,
        position: u64,
        connected: bool,
        timestamp: u64,
    },
    /// The backend's voice connection for this destination closed.
    VoiceClosed {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
        timestamp: u64,
    },
    /// The last track finished and nothing is queued.
    QueueEnd { guild_id: String, timestamp: u64 },
    /// The session moved between instances. `current: None` means parked.
    InstanceChanged {
        guild_id: String,
        previous: Option<String>,
        current: Option<String>,
        timestamp: u64,
    },
    /// A buffered play request was discarded.
    RequestDropped {
        guild_id: String,
        identifier: String,
        code: &'static str,
        message: String,
        timestamp: u64,
    },
    /// A command issued on the session's behalf failed, or the backend
    /// could not play the current track (`play_failure`).
    PlayerError {
        guild_id: String,
        code: &'static str,
        message: String,
        timestamp: u64,
    },
}

impl PlayerEvent {
    pub fn guild_id(&self) -> &str {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::PlayerUpdate { guild_id, .. }
            | Self::VoiceClosed { guild_id, .. }
            | Self::QueueEnd { guild_id, .. }
            | Self::InstanceChanged { guild_id, .. }
            | Self::RequestDropped { guild_id, .. }
            | Self::PlayerError { guild_id, .. } => guild_id,
        }
    }
}

impl From<InstanceEvent> for LavaEvent {
    fn from(event: InstanceEvent) -> Self {
        Self::Instance(event)
    }
}

impl From<PlayerEvent> for LavaEvent {
    fn from(event: PlayerEvent) -> Self {
        Self::Player(event)
    }
}
