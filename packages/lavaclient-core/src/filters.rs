//! Audio filter parameter blocks.
//!
//! Filters are applied by the backend; this module only validates parameters
//! and renders the JSON object sent with the `filters` op. The backend applies
//! them in its own fixed order regardless of how they were added here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LavaError, LavaResult};

/// Number of equalizer bands the backend exposes.
pub const EQUALIZER_BANDS: usize = 15;

fn invalid(message: impl Into<String>) -> LavaError {
    LavaError::Validation(message.into())
}

fn check(condition: bool, message: &str) -> LavaResult<()> {
    if condition {
        Ok(())
    } else {
        Err(invalid(message))
    }
}

/// Identifies a filter kind. At most one filter of each kind is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    Volume,
    Equalizer,
    Karaoke,
    Timescale,
    Tremolo,
    Vibrato,
    Rotation,
    Distortion,
    ChannelMix,
    LowPass,
}

impl FilterKind {
    /// Key of this filter in the `filters` payload.
    pub fn key(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Equalizer => "equalizer",
            Self::Karaoke => "karaoke",
            Self::Timescale => "timescale",
            Self::Tremolo => "tremolo",
            Self::Vibrato => "vibrato",
            Self::Rotation => "rotation",
            Self::Distortion => "distortion",
            Self::ChannelMix => "channelMix",
            Self::LowPass => "lowPass",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

impl Default for Karaoke {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timescale {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

impl Timescale {
    pub fn new(speed: f32, pitch: f32, rate: f32) -> LavaResult<Self> {
        check(speed > 0.0, "timescale speed must be greater than 0")?;
        check(pitch > 0.0, "timescale pitch must be greater than 0")?;
        check(rate > 0.0, "timescale rate must be greater than 0")?;
        Ok(Self { speed, pitch, rate })
    }
}

/// Shared shape of tremolo and vibrato.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Oscillation {
    pub frequency: f32,
    pub depth: f32,
}

impl Oscillation {
    /// Tremolo: frequency > 0, depth in `(0, 1]`.
    pub fn tremolo(frequency: f32, depth: f32) -> LavaResult<Self> {
        check(frequency > 0.0, "tremolo frequency must be greater than 0")?;
        check(depth > 0.0 && depth <= 1.0, "tremolo depth must be within (0, 1]")?;
        Ok(Self { frequency, depth })
    }

    /// Vibrato: frequency in `(0, 14]`, depth in `(0, 1]`.
    pub fn vibrato(frequency: f32, depth: f32) -> LavaResult<Self> {
        check(
            frequency > 0.0 && frequency <= 14.0,
            "vibrato frequency must be within (0, 14]",
        )?;
        check(depth > 0.0 && depth <= 1.0, "vibrato depth must be within (0, 1]")?;
        Ok(Self { frequency, depth })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub rotation_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowPass {
    pub smoothing: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    pub left_to_left: f32,
    pub left_to_right: f32,
    pub right_to_left: f32,
    pub right_to_right: f32,
}

impl ChannelMix {
    pub fn new(
        left_to_left: f32,
        left_to_right: f32,
        right_to_left: f32,
        right_to_right: f32,
    ) -> LavaResult<Self> {
        for value in [left_to_left, left_to_right, right_to_left, right_to_right] {
            check(
                (0.0..=1.0).contains(&value),
                "channel mix factors must be within [0, 1]",
            )?;
        }
        Ok(Self {
            left_to_left,
            left_to_right,
            right_to_left,
            right_to_right,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

/// One validated filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Multiplier in `[0, 5]`. 1.0 is unchanged.
    Volume(f32),
    /// Gain per band, each in `[-0.25, 1.0]`.
    Equalizer([f32; EQUALIZER_BANDS]),
    Karaoke(Karaoke),
    Timescale(Timescale),
    Tremolo(Oscillation),
    Vibrato(Oscillation),
    Rotation(Rotation),
    Distortion(Distortion),
    ChannelMix(ChannelMix),
    LowPass(LowPass),
}

impl Filter {
    pub fn volume(volume: f32) -> LavaResult<Self> {
        check(
            (0.0..=5.0).contains(&volume),
            "filter volume must be within [0, 5]",
        )?;
        Ok(Self::Volume(volume))
    }

    /// Builds an equalizer from `(band, gain)` pairs; unspecified bands are flat.
    pub fn equalizer(bands: &[(usize, f32)]) -> LavaResult<Self> {
        let mut gains = [0.0f32; EQUALIZER_BANDS];
        for &(band, gain) in bands {
            check(band < EQUALIZER_BANDS, "equalizer band must be within 0..15")?;
            check(
                (-0.25..=1.0).contains(&gain),
                "equalizer gain must be within [-0.25, 1.0]",
            )?;
            gains[band] = gain;
        }
        Ok(Self::Equalizer(gains))
    }

    pub fn rotation(rotation_hz: f32) -> LavaResult<Self> {
        check(rotation_hz >= 0.0, "rotation speed must be >= 0")?;
        Ok(Self::Rotation(Rotation { rotation_hz }))
    }

    pub fn low_pass(smoothing: f32) -> LavaResult<Self> {
        check(smoothing > 1.0, "low pass smoothing must be greater than 1")?;
        Ok(Self::LowPass(LowPass { smoothing }))
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Self::Volume(_) => FilterKind::Volume,
            Self::Equalizer(_) => FilterKind::Equalizer,
            Self::Karaoke(_) => FilterKind::Karaoke,
            Self::Timescale(_) => FilterKind::Timescale,
            Self::Tremolo(_) => FilterKind::Tremolo,
            Self::Vibrato(_) => FilterKind::Vibrato,
            Self::Rotation(_) => FilterKind::Rotation,
            Self::Distortion(_) => FilterKind::Distortion,
            Self::ChannelMix(_) => FilterKind::ChannelMix,
            Self::LowPass(_) => FilterKind::LowPass,
        }
    }

    /// JSON value of this filter within the `filters` payload.
    pub fn payload(&self) -> Value {
        let value = match self {
            Self::Volume(volume) => serde_json::to_value(volume),
            Self::Equalizer(gains) => {
                let bands: Vec<Value> = gains
                    .iter()
                    .enumerate()
                    .map(|(band, gain)| serde_json::json!({ "band": band, "gain": gain }))
                    .collect();
                return Value::Array(bands);
            }
            Self::Karaoke(p) => serde_json::to_value(p),
            Self::Timescale(p) => serde_json::to_value(p),
            Self::Tremolo(p) | Self::Vibrato(p) => serde_json::to_value(p),
            Self::Rotation(p) => serde_json::to_value(p),
            Self::Distortion(p) => serde_json::to_value(p),
            Self::ChannelMix(p) => serde_json::to_value(p),
            Self::LowPass(p) => serde_json::to_value(p),
        };
        // plain structs of finite floats always serialize
        value.unwrap_or(Value::Null)
    }
}

/// The active filter set of a session, at most one filter per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: BTreeMap<FilterKind, Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `filter`, replacing any filter of the same kind.
    pub fn set(&mut self, filter: Filter) -> Option<Filter> {
        self.filters.insert(filter.kind(), filter)
    }

    #[must_use]
    pub fn with(mut self, filter: Filter) -> Self {
        self.set(filter);
        self
    }

    pub fn remove(&mut self, kind: FilterKind) -> Option<Filter> {
        self.filters.remove(&kind)
    }

    pub fn get(&self, kind: FilterKind) -> Option<&Filter> {
        self.filters.get(&kind)
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.values()
    }

    /// Renders the object sent verbatim with the `filters` op.
    pub fn to_payload(&self) -> Map<String, Value> {
        self.filters
            .iter()
            .map(|(kind, filter)| (kind.key().to_string(), filter.payload()))
            .collect()
    }
}
