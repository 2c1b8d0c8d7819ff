//! Instance statistics and the load-balancing penalty.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{FRAMES_PER_WINDOW, NO_STATS_PENALTY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    /// Whole-system load as a fraction in `0.0..=1.0`.
    pub system_load: f64,
    /// Load of the backend process alone.
    pub lavalink_load: f64,
}

/// Audio frame counters over the last reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

/// One `stats` push from an instance. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub players: u32,
    pub playing_players: u32,
    /// Uptime in milliseconds.
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

/// Penalty breakdown derived from a [`StatsSnapshot`]. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Penalty {
    pub players: f64,
    pub cpu: f64,
    pub deficit_frames: f64,
    pub nulled_frames: f64,
    pub total: f64,
}

impl Penalty {
    /// Penalty of an instance that has not reported statistics yet.
    pub fn unknown() -> Self {
        Self {
            players: 0.0,
            cpu: 0.0,
            deficit_frames: 0.0,
            nulled_frames: 0.0,
            total: NO_STATS_PENALTY,
        }
    }

    pub fn from_stats(stats: &StatsSnapshot) -> Self {
        let players = f64::from(stats.players);
        let cpu = 1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0;

        let (deficit_frames, nulled_frames) = match stats.frame_stats {
            Some(frames) => (
                frame_penalty(frames.deficit, 600.0),
                frame_penalty(frames.nulled, 300.0) * 2.0,
            ),
            None => (0.0, 0.0),
        };

        Self {
            players,
            cpu,
            deficit_frames,
            nulled_frames,
            total: players + cpu + deficit_frames + nulled_frames,
        }
    }
}

/// Grows steeply with the share of bad frames in the window. Negative
/// counters mean "not measured" and contribute nothing.
fn frame_penalty(count: i64, weight: f64) -> f64 {
    if count < 0 {
        return 0.0;
    }
    1.03f64.powf(500.0 * (count as f64 / FRAMES_PER_WINDOW)) * weight - weight
}

/// A snapshot and the penalty computed from it, stored together so readers
/// never see one without the other.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStats {
    pub snapshot: StatsSnapshot,
    pub penalty: Penalty,
}

impl InstanceStats {
    pub fn new(snapshot: StatsSnapshot) -> Self {
        let penalty = Penalty::from_stats(&snapshot);
        Self { snapshot, penalty }
    }
}
