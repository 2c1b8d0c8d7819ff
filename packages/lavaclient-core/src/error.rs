//! Centralized error types for the lavaclient core library.
//!
//! Every fallible operation in the crate returns [`LavaResult`]. Errors are
//! grouped by how a caller is expected to react:
//! - Caller input problems (`Validation`) are rejected synchronously
//! - Connection problems (`Transport`, `Authentication`) recover through
//!   reconnect and failover, or surface as instance events
//! - Decoding problems (`Codec`) are isolated to a single message or identifier

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Library-wide error type.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum LavaError {
    /// The backend rejected our credential during the channel handshake.
    ///
    /// Fatal for the instance: it is never retried automatically.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Writing to or reading from a persistent channel failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A track identifier or inbound message could not be decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Caller supplied an out-of-range or otherwise invalid argument.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No backend instance is currently usable.
    #[error("No available instance{}", region_suffix(.0))]
    NoAvailableInstance(Option<String>),

    /// A bounded buffer overflowed and this request was discarded.
    #[error("Backpressure: {0}")]
    Backpressure(String),

    /// Loading or resolving a track failed.
    #[error("Load failed: {0}")]
    Load(String),

    /// The backend could not play a track.
    #[error("Playback failed: {0}")]
    PlayFailure(String),

    /// Referenced instance is not registered.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// An instance with the same name is already registered.
    #[error("Instance already registered: {0}")]
    DuplicateInstance(String),

    /// Static configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request/response call to an instance failed.
    #[error("HTTP request failed: {0}")]
    Http(String),
}

fn region_suffix(region: &Option<String>) -> String {
    match region {
        Some(region) => format!(" (region hint: {region})"),
        None => String::new(),
    }
}

impl ErrorCode for LavaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_failed",
            Self::Transport(_) => "transport_error",
            Self::Codec(_) => "codec_error",
            Self::Validation(_) => "validation_error",
            Self::NoAvailableInstance(_) => "no_available_instance",
            Self::Backpressure(_) => "backpressure",
            Self::Load(_) => "load_failed",
            Self::PlayFailure(_) => "play_failure",
            Self::InstanceNotFound(_) => "instance_not_found",
            Self::DuplicateInstance(_) => "duplicate_instance",
            Self::Configuration(_) => "configuration_error",
            Self::Http(_) => "http_request_failed",
        }
    }
}

impl LavaError {
    /// Returns true when retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NoAvailableInstance(_) | Self::Http(_)
        )
    }
}

/// Convenient Result alias for library-wide operations.
pub type LavaResult<T> = Result<T, LavaError>;

impl From<serde_json::Error> for LavaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<base64::DecodeError> for LavaError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Codec(format!("invalid base64: {err}"))
    }
}

impl From<reqwest::Error> for LavaError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
