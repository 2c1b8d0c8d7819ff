//! Big-endian primitive reader/writer with Java modified UTF-8 strings.

use crate::error::{LavaError, LavaResult};
use crate::protocol_constants::MAX_UTF_LENGTH;

pub(crate) struct DataReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DataReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> LavaResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(LavaError::Codec(format!(
                "unexpected end of record: wanted {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> LavaResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> LavaResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_bool(&mut self) -> LavaResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LavaError::Codec(format!("invalid boolean byte {other:#04x}"))),
        }
    }

    pub(crate) fn read_u16(&mut self) -> LavaResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32(&mut self) -> LavaResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> LavaResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_utf(&mut self) -> LavaResult<String> {
        let len = self.read_u16()? as usize;
        decode_modified_utf8(self.read_bytes(len)?)
    }

    pub(crate) fn read_nullable_utf(&mut self) -> LavaResult<Option<String>> {
        if self.read_bool()? {
            self.read_utf().map(Some)
        } else {
            Ok(None)
        }
    }
}

#[derive(Default)]
pub(crate) struct DataWriter {
    buf: Vec<u8>,
}

impl DataWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_utf(&mut self, value: &str) -> LavaResult<()> {
        let encoded = encode_modified_utf8(value);
        if encoded.len() > MAX_UTF_LENGTH {
            return Err(LavaError::Codec(format!(
                "string too long to encode: {} bytes",
                encoded.len()
            )));
        }
        self.buf
            .extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(&encoded);
        Ok(())
    }

    pub(crate) fn write_nullable_utf(&mut self, value: Option<&str>) -> LavaResult<()> {
        self.write_bool(value.is_some());
        match value {
            Some(value) => self.write_utf(value),
            None => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Modified UTF-8
// ─────────────────────────────────────────────────────────────────────────────

fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Strict decoder: overlong forms are rejected so every accepted string
/// re-encodes to the same bytes.
fn decode_modified_utf8(bytes: &[u8]) -> LavaResult<String> {
    let malformed = |offset: usize| LavaError::Codec(format!("malformed string at byte {offset}"));
    let continuation = |offset: usize| -> LavaResult<u16> {
        match bytes.get(offset) {
            Some(&b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
            _ => Err(malformed(offset)),
        }
    };

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            if b == 0 {
                return Err(malformed(i));
            }
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let unit = (u16::from(b & 0x1F) << 6) | continuation(i + 1)?;
            if unit != 0 && unit < 0x80 {
                return Err(malformed(i));
            }
            units.push(unit);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let unit = (u16::from(b & 0x0F) << 12)
                | (continuation(i + 1)? << 6)
                | continuation(i + 2)?;
            if unit < 0x800 {
                return Err(malformed(i));
            }
            units.push(unit);
            i += 3;
        } else {
            return Err(malformed(i));
        }
    }

    String::from_utf16(&units)
        .map_err(|_| LavaError::Codec("string contains unpaired surrogate".to_string()))
}
