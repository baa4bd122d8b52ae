//! Section compression.
//!
//! Every section is compressed independently with xz so that one section can
//! be replaced without touching the others. Structured sections (params,
//! result, signature) are JSON before compression.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::constants::MAX_SECTION_SIZE;
use crate::domain::header::Section;
use crate::error::{Result, TaskError};

const XZ_LEVEL: u32 = 6;

/// Compresses `raw`. Empty input yields an empty block so the section stays
/// absent.
pub fn compress(section: Section, raw: &[u8]) -> Result<Vec<u8>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let codec_error = |e: std::io::Error| TaskError::Codec {
        section: section.name(),
        message: e.to_string(),
    };
    let mut encoder = XzEncoder::new(Vec::new(), XZ_LEVEL);
    encoder.write_all(raw).map_err(codec_error)?;
    let block = encoder.finish().map_err(codec_error)?;
    check_size(section, block.len())?;
    Ok(block)
}

/// Rejects blocks too large for the header's size fields.
pub(crate) fn check_size(section: Section, len: usize) -> Result<()> {
    if len > MAX_SECTION_SIZE {
        return Err(TaskError::Codec {
            section: section.name(),
            message: format!("{len} bytes exceed the {MAX_SECTION_SIZE}-byte section limit"),
        });
    }
    Ok(())
}

/// Decompresses a block produced by [`compress`].
pub fn decompress(block: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    XzDecoder::new(block).read_to_end(&mut out)?;
    Ok(out)
}

/// Serializes `value` as JSON and compresses it.
pub fn encode_json<T: Serialize>(section: Section, value: &T) -> Result<Vec<u8>> {
    let raw = serde_json::to_vec(value).map_err(|e| TaskError::Codec {
        section: section.name(),
        message: e.to_string(),
    })?;
    compress(section, &raw)
}

/// Reason a section could not be decoded.
#[derive(Debug)]
pub enum DecodeError {
    /// The compressed stream is corrupt or cut short.
    Compression(std::io::Error),
    /// The decompressed bytes are not the expected JSON.
    Json(serde_json::Error),
    /// The decompressed bytes are not UTF-8 text.
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compression(e) => write!(f, "decompression failed: {e}"),
            Self::Json(e) => write!(f, "invalid JSON: {e}"),
            Self::Utf8(e) => write!(f, "invalid UTF-8: {e}"),
        }
    }
}

/// Decompresses and parses a JSON section.
pub fn decode_json<T: DeserializeOwned>(block: &[u8]) -> std::result::Result<T, DecodeError> {
    let raw = decompress(block).map_err(DecodeError::Compression)?;
    serde_json::from_slice(&raw).map_err(DecodeError::Json)
}

/// Decompresses a text section.
pub fn decode_text(block: &[u8]) -> std::result::Result<String, DecodeError> {
    let raw = decompress(block).map_err(DecodeError::Compression)?;
    String::from_utf8(raw).map_err(DecodeError::Utf8)
}
