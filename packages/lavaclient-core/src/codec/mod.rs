//! Codec for the opaque track identifier exchanged with the backend.
//!
//! An identifier is the base64 rendering of a binary record:
//!
//! ```text
//! u32 header        flags (top 2 bits) | payload length (low 30 bits)
//! [u8 version]      present when the versioned flag is set; otherwise legacy v1
//! utf title, utf author, u64 length, utf identifier, bool isStream
//! [v2+] nullable utf uri
//! [v3]  nullable utf artworkUrl, nullable utf isrc
//! utf sourceName
//! ..source fields.. shape depends on sourceName, see [`SourceFields`]
//! u64 position      always the final 8 bytes
//! ```
//!
//! Strings are Java modified UTF-8 with a u16 length prefix. Decoding is
//! strict: the declared payload length must match the bytes present, and any
//! record that decodes re-encodes to the identical identifier.

mod io;
mod sources;

pub use sources::{CatalogFields, SourceFields};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{LavaError, LavaResult};
use crate::protocol_constants::{
    TRACK_INFO_VERSION, TRACK_LEGACY_VERSION, TRACK_SIZE_MASK, TRACK_VERSIONED_FLAG,
};
use io::{DataReader, DataWriter};

/// Decoded track metadata.
///
/// Also the shape of the `info` object in the backend's JSON responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    pub author: String,
    /// Duration in milliseconds.
    pub length: u64,
    pub identifier: String,
    pub is_stream: bool,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
    /// Start position in milliseconds.
    #[serde(default)]
    pub position: u64,
}

impl TrackInfo {
    pub fn is_seekable(&self) -> bool {
        !self.is_stream
    }
}

/// A fully decoded track identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    /// Record layout version (1 = legacy, unflagged).
    pub version: u8,
    pub info: TrackInfo,
    pub source: SourceFields,
}

impl TrackRecord {
    /// Creates a record in the current layout version.
    pub fn new(info: TrackInfo) -> Self {
        Self {
            version: TRACK_INFO_VERSION,
            info,
            source: SourceFields::None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceFields) -> Self {
        self.source = source;
        self
    }

    /// Encodes this record into its identifier string.
    pub fn encode(&self) -> LavaResult<String> {
        encode_track(self)
    }
}

/// Decodes an identifier string.
pub fn decode_track(encoded: &str) -> LavaResult<TrackRecord> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let mut reader = DataReader::new(&bytes);

    let header = reader.read_u32()?;
    let flags = header & !TRACK_SIZE_MASK;
    if flags & !TRACK_VERSIONED_FLAG != 0 {
        return Err(LavaError::Codec(format!(
            "unknown header flags {flags:#010x}"
        )));
    }
    let versioned = flags == TRACK_VERSIONED_FLAG;
    let declared = (header & TRACK_SIZE_MASK) as usize;
    if declared != reader.remaining() {
        return Err(LavaError::Codec(format!(
            "length prefix says {declared} bytes but {} follow",
            reader.remaining()
        )));
    }

    let version = if versioned {
        reader.read_u8()?
    } else {
        TRACK_LEGACY_VERSION
    };
    if versioned && !(2..=TRACK_INFO_VERSION).contains(&version) {
        return Err(LavaError::Codec(format!(
            "unsupported record version {version}"
        )));
    }

    let title = reader.read_utf()?;
    let author = reader.read_utf()?;
    let length = reader.read_u64()?;
    let identifier = reader.read_utf()?;
    let is_stream = reader.read_bool()?;
    let uri = if version >= 2 {
        reader.read_nullable_utf()?
    } else {
        None
    };
    let (artwork_url, isrc) = if version >= 3 {
        (reader.read_nullable_utf()?, reader.read_nullable_utf()?)
    } else {
        (None, None)
    };
    let source_name = reader.read_utf()?;

    let trailer = reader.remaining().checked_sub(8).ok_or_else(|| {
        LavaError::Codec("record ends before the position field".to_string())
    })?;
    let source = SourceFields::parse(&source_name, reader.read_bytes(trailer)?);
    let position = reader.read_u64()?;

    Ok(TrackRecord {
        version,
        info: TrackInfo {
            title,
            author,
            length,
            identifier,
            is_stream,
            uri,
            artwork_url,
            isrc,
            source_name,
            position,
        },
        source,
    })
}

/// Encodes a record into its identifier string.
///
/// Fields the record's version cannot carry (e.g. `uri` on a legacy record)
/// are rejected rather than silently dropped.
pub fn encode_track(record: &TrackRecord) -> LavaResult<String> {
    let version = record.version;
    if !(TRACK_LEGACY_VERSION..=TRACK_INFO_VERSION).contains(&version) {
        return Err(LavaError::Codec(format!(
            "unsupported record version {version}"
        )));
    }

    let info = &record.info;
    if version < 2 && info.uri.is_some() {
        return Err(LavaError::Codec("legacy records cannot carry a uri".into()));
    }
    if version < 3 && (info.artwork_url.is_some() || info.isrc.is_some()) {
        return Err(LavaError::Codec(format!(
            "version {version} records cannot carry artwork or isrc"
        )));
    }

    let mut writer = DataWriter::new();
    if version >= 2 {
        writer.write_u8(version);
    }
    writer.write_utf(&info.title)?;
    writer.write_utf(&info.author)?;
    writer.write_u64(info.length);
    writer.write_utf(&info.identifier)?;
    writer.write_bool(info.is_stream);
    if version >= 2 {
        writer.write_nullable_utf(info.uri.as_deref())?;
    }
    if version >= 3 {
        writer.write_nullable_utf(info.artwork_url.as_deref())?;
        writer.write_nullable_utf(info.isrc.as_deref())?;
    }
    writer.write_utf(&info.source_name)?;
    record.source.write(&mut writer)?;
    writer.write_u64(info.position);

    let payload = writer.into_inner();
    let size = u32::try_from(payload.len())
        .ok()
        .filter(|size| *size <= TRACK_SIZE_MASK)
        .ok_or_else(|| LavaError::Codec("record too large".to_string()))?;
    let header = if version >= 2 {
        size | TRACK_VERSIONED_FLAG
    } else {
        size
    };

    let mut bytes = Vec::with_capacity(payload.len() + 4);
    bytes.extend_from_slice(&header.to_be_bytes());
    bytes.extend_from_slice(&payload);
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_info;

    fn legacy_info() -> TrackInfo {
        TrackInfo {
            uri: None,
            artwork_url: None,
            isrc: None,
            ..sample_info("legacy-1")
        }
    }

    #[test]
    fn new_records_round_trip_as_v3() {
        let record = TrackRecord::new(sample_info("dQw4w9WgXcQ"));
        let encoded = record.encode().unwrap();
        let decoded = decode_track(&encoded).unwrap();

        assert_eq!(decoded.version, 3);
        assert_eq!(decoded, record);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn legacy_records_keep_their_layout() {
        let record = TrackRecord {
            version: 1,
            info: legacy_info(),
            source: SourceFields::None,
        };
        let encoded = record.encode().unwrap();
        let bytes = STANDARD.decode(&encoded).unwrap();
        // no versioned flag in the header
        assert_eq!(bytes[0] & 0x40, 0);

        let decoded = decode_track(&encoded).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn v2_records_carry_uri_but_not_artwork() {
        let mut info = legacy_info();
        info.uri = Some("https://example.com/a.mp3".into());
        let record = TrackRecord {
            version: 2,
            info,
            source: SourceFields::ProbeInfo("mp3".into()),
        };
        let decoded = decode_track(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);

        let mut bad = record.clone();
        bad.info.isrc = Some("USUM71703861".into());
        assert!(matches!(bad.encode(), Err(LavaError::Codec(_))));
    }

    #[test]
    fn unknown_source_fields_survive_round_trip() {
        let mut info = sample_info("opaque-1");
        info.source_name = "niche-source".into();
        let record = TrackRecord::new(info).with_source(SourceFields::Opaque(vec![9, 8, 7, 6, 5]));
        let encoded = record.encode().unwrap();

        let decoded = decode_track(&encoded).unwrap();
        assert_eq!(decoded.source, SourceFields::Opaque(vec![9, 8, 7, 6, 5]));
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let encoded = TrackRecord::new(sample_info("trunc")).encode().unwrap();
        let mut bytes = STANDARD.decode(&encoded).unwrap();
        bytes.pop();
        let err = decode_track(&STANDARD.encode(&bytes)).unwrap_err();
        assert!(matches!(err, LavaError::Codec(_)));
    }

    #[test]
    fn padded_payload_is_rejected() {
        let encoded = TrackRecord::new(sample_info("pad")).encode().unwrap();
        let mut bytes = STANDARD.decode(&encoded).unwrap();
        bytes.push(0);
        let err = decode_track(&STANDARD.encode(&bytes)).unwrap_err();
        assert!(matches!(err, LavaError::Codec(_)));
    }

    #[test]
    fn consistent_but_short_length_is_rejected() {
        // header claims exactly the bytes present, but they end mid-record
        let bytes = vec![0x40, 0x00, 0x00, 0x03, 3, 0x00, 0x01];
        let err = decode_track(&STANDARD.encode(&bytes)).unwrap_err();
        assert!(matches!(err, LavaError::Codec(_)));
    }

    #[test]
    fn unknown_header_flag_is_rejected() {
        for version in [1, 3] {
            let record = TrackRecord {
                version,
                info: legacy_info(),
                source: SourceFields::None,
            };
            let mut bytes = STANDARD.decode(record.encode().unwrap()).unwrap();
            bytes[0] |= 0x80;
            let err = decode_track(&STANDARD.encode(&bytes)).unwrap_err();
            assert!(matches!(err, LavaError::Codec(_)), "v{version}: {err:?}");
        }
    }

    #[test]
    fn invalid_base64_is_codec_error() {
        assert!(matches!(decode_track("***"), Err(LavaError::Codec(_))));
    }
}
