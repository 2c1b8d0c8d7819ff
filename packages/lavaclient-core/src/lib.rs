//! Lavaclient Core - control-plane client for Lavalink-style audio backends.
//!
//! The crate manages a set of remote audio instances, routes each playback
//! destination to the best of them, keeps the desired playback state of every
//! destination, and speaks the backends' wire protocol. Audio itself never
//! passes through it: only opaque track identifiers and control messages do.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`codec`]: Binary track identifier format
//! - [`channel`]: Persistent channel per instance (connect, resume, reconnect)
//! - [`instances`]: Instance registry and load balancing
//! - [`session`]: Per-destination playback state machine and its registry
//! - [`dispatcher`]: Routing of backend traffic, failover coordination
//! - [`rest`]: Request/response calls (track loading and decoding)
//! - [`bootstrap`]: The [`LavaClient`] composition root
//! - [`events`]: Event system for observers
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`Connector`](channel::Connector): Opening persistent channels
//! - [`TrackSource`](rest::TrackSource): Custom search sources
//! - [`PlayableSource`](track::PlayableSource): Lazily resolved tracks

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filters;
pub mod instances;
pub mod protocol;
pub mod protocol_constants;
pub mod rest;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod track;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use bootstrap::{bootstrap_client, bootstrap_with_connector, LavaClient};
pub use channel::{ConnectionState, Connector, WsConnector};
pub use codec::{decode_track, encode_track, TrackInfo, TrackRecord};
pub use config::{BackoffConfig, ClientConfig, InstanceConfig};
pub use error::{ErrorCode, LavaError, LavaResult};
pub use events::{
    BroadcastEventBridge, EventEmitter, InstanceEvent, LavaEvent, LoggingEventEmitter,
    NoopEventEmitter, PlayerEvent,
};
pub use filters::{Filter, FilterChain, FilterKind};
pub use instances::{Instance, InstanceRegistry};
pub use rest::{LoadResult, PlaylistInfo, RestClient, TrackLoader, TrackSource};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{
    LoopMode, PlayOptions, PlayOutcome, PlaybackStatus, Session, SessionRegistry, VoiceState,
};
pub use stats::{InstanceStats, StatsSnapshot};
pub use track::{PlayableSource, Track};
pub use utils::{format_time, now_millis, parse_time};
