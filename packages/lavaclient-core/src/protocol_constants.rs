//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the backend's wire protocol and the track
//! identifier format; changing them would break compatibility.

// ─────────────────────────────────────────────────────────────────────────────
// Channel Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Header carrying the instance credential.
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Header carrying the bot/user id the backend plays on behalf of.
pub const HEADER_USER_ID: &str = "User-Id";

/// Header identifying this client library to the backend.
pub const HEADER_CLIENT_NAME: &str = "Client-Name";

/// Header carrying the resume token on reconnect (v3 naming).
pub const HEADER_RESUME_KEY: &str = "Resume-Key";

/// Header carrying the resume token on reconnect (session naming).
pub const HEADER_SESSION_ID: &str = "Session-Id";

/// HTTP statuses on the upgrade response that mean "bad credential".
pub const AUTH_REJECTED_STATUSES: [u16; 2] = [401, 403];

// ─────────────────────────────────────────────────────────────────────────────
// Player Limits
// ─────────────────────────────────────────────────────────────────────────────

/// Lowest volume accepted by the backend.
pub const MIN_VOLUME: u16 = 0;

/// Highest volume accepted by the backend.
pub const MAX_VOLUME: u16 = 1000;

/// Volume a new session starts at.
pub const DEFAULT_VOLUME: u16 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Load Balancing
// ─────────────────────────────────────────────────────────────────────────────

/// Penalty assigned to an instance that has not reported statistics yet.
///
/// Large enough that any instance with stats wins, while still leaving the
/// instance selectable when nothing else is usable.
pub const NO_STATS_PENALTY: f64 = 9e30;

/// Frames per reporting window the backend's frame counters are relative to.
pub const FRAMES_PER_WINDOW: f64 = 3000.0;

// ─────────────────────────────────────────────────────────────────────────────
// Track Identifier Format
// ─────────────────────────────────────────────────────────────────────────────

/// Header bit marking a versioned record (a version byte follows the header).
pub const TRACK_VERSIONED_FLAG: u32 = 1 << 30;

/// Mask selecting the payload length from the header word.
pub const TRACK_SIZE_MASK: u32 = 0x3FFF_FFFF;

/// Version written for newly constructed records.
pub const TRACK_INFO_VERSION: u8 = 3;

/// Version implied by a record without the versioned flag.
pub const TRACK_LEGACY_VERSION: u8 = 1;

/// Maximum encoded byte length of one modified UTF-8 string.
pub const MAX_UTF_LENGTH: usize = u16::MAX as usize;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default number of play requests a parked session buffers.
pub const DEFAULT_PENDING_CAPACITY: usize = 16;

/// Default number of commands queued on a channel while it resumes.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 64;

/// Default resume window offered to the backend (seconds).
pub const DEFAULT_RESUME_TIMEOUT_SECS: u64 = 60;

/// Timeout for request/response calls (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Client name prefix sent in the handshake.
pub const CLIENT_NAME: &str = "lavaclient";
