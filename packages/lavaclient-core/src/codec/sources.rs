//! Source-specific trailing fields of a track record.
//!
//! Each source manager on the backend may append its own fields between the
//! source name and the final position word. Known shapes are decoded into
//! typed variants; everything else is carried as opaque bytes so re-encoding
//! reproduces the original record.

use serde::{Deserialize, Serialize};

use super::io::{DataReader, DataWriter};
use crate::error::LavaResult;

/// Extra metadata appended by mirrored-catalog sources (deezer, spotify, applemusic).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFields {
    pub album_name: Option<String>,
    pub album_url: Option<String>,
    pub artist_url: Option<String>,
    pub artist_artwork_url: Option<String>,
    pub preview_url: Option<String>,
    pub is_preview: bool,
}

/// Decoded source-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SourceFields {
    /// The source wrote nothing.
    #[default]
    None,
    /// Container probe hint written by the `http` and `local` sources.
    ProbeInfo(String),
    Catalog(CatalogFields),
    /// Unrecognized bytes, kept verbatim.
    Opaque(Vec<u8>),
}

const PROBE_SOURCES: [&str; 2] = ["http", "local"];
const CATALOG_SOURCES: [&str; 3] = ["deezer", "spotify", "applemusic"];

impl SourceFields {
    /// Interprets `bytes` according to `source_name`.
    ///
    /// Never fails: a known tag whose bytes do not match the expected shape
    /// exactly falls back to [`SourceFields::Opaque`].
    pub(crate) fn parse(source_name: &str, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::None;
        }

        let typed = if PROBE_SOURCES.contains(&source_name) {
            parse_exact(bytes, |r| r.read_utf().map(Self::ProbeInfo))
        } else if CATALOG_SOURCES.contains(&source_name) {
            parse_exact(bytes, |r| read_catalog(r).map(Self::Catalog))
        } else {
            None
        };

        // Only keep the typed form if it writes back to the same bytes
        match typed {
            Some(fields) if fields.to_bytes().ok().as_deref() == Some(bytes) => fields,
            _ => Self::Opaque(bytes.to_vec()),
        }
    }

    pub(crate) fn write(&self, writer: &mut DataWriter) -> LavaResult<()> {
        match self {
            Self::None => Ok(()),
            Self::ProbeInfo(info) => writer.write_utf(info),
            Self::Catalog(fields) => {
                writer.write_nullable_utf(fields.album_name.as_deref())?;
                writer.write_nullable_utf(fields.album_url.as_deref())?;
                writer.write_nullable_utf(fields.artist_url.as_deref())?;
                writer.write_nullable_utf(fields.artist_artwork_url.as_deref())?;
                writer.write_nullable_utf(fields.preview_url.as_deref())?;
                writer.write_bool(fields.is_preview);
                Ok(())
            }
            Self::Opaque(bytes) => {
                writer.write_bytes(bytes);
                Ok(())
            }
        }
    }

    fn to_bytes(&self) -> LavaResult<Vec<u8>> {
        let mut writer = DataWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }
}

fn parse_exact<F>(bytes: &[u8], read: F) -> Option<SourceFields>
where
    F: FnOnce(&mut DataReader<'_>) -> LavaResult<SourceFields>,
{
    let mut reader = DataReader::new(bytes);
    let fields = read(&mut reader).ok()?;
    (reader.remaining() == 0).then_some(fields)
}

fn read_catalog(reader: &mut DataReader<'_>) -> LavaResult<CatalogFields> {
    Ok(CatalogFields {
        album_name: reader.read_nullable_utf()?,
        album_url: reader.read_nullable_utf()?,
        artist_url: reader.read_nullable_utf()?,
        artist_artwork_url: reader.read_nullable_utf()?,
        preview_url: reader.read_nullable_utf()?,
        is_preview: reader.read_bool()?,
    })
}
