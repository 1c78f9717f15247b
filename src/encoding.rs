//! # Payload Encoding
//!
//! Decides how a normalized JSON document is stored in the owned ConfigMap:
//! plain under `decofile.json`, or brotli-compressed and base64-wrapped under
//! `decofile.bin` once the document crosses the size threshold.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::constants::{COMPRESSION_THRESHOLD_BYTES, CONTENT_KEY_BIN, CONTENT_KEY_JSON};

/// Brotli quality; 11 is the best-compression setting
const BROTLI_QUALITY: i32 = 11;

/// Brotli window size (log2)
const BROTLI_LGWIN: i32 = 22;

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("failed to brotli-compress document: {0}")]
    Compress(#[source] std::io::Error),
    #[error("failed to brotli-decompress document: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("failed to base64-decode document: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Which ConfigMap key carries the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKey {
    /// Plain UTF-8 JSON under `decofile.json`
    Json,
    /// base64(brotli(JSON)) under `decofile.bin`
    Bin,
}

impl ContentKey {
    /// The ConfigMap data key for this encoding
    pub fn data_key(self) -> &'static str {
        match self {
            ContentKey::Json => CONTENT_KEY_JSON,
            ContentKey::Bin => CONTENT_KEY_BIN,
        }
    }

    /// The file extension consumers see through `DECO_RELEASE`
    pub fn extension(self) -> &'static str {
        match self {
            ContentKey::Json => "json",
            ContentKey::Bin => "bin",
        }
    }
}

/// Encoded ConfigMap content for one configuration generation
#[derive(Debug, Clone)]
pub struct Payload {
    pub key: ContentKey,
    pub value: String,
}

/// Encode a normalized JSON document for ConfigMap storage.
///
/// Documents at or under the threshold are stored verbatim; larger ones are
/// brotli-compressed at best quality and base64-wrapped so they survive the
/// ConfigMap's UTF-8 value constraint.
pub fn encode(json: &str) -> Result<Payload, EncodingError> {
    if json.len() <= COMPRESSION_THRESHOLD_BYTES {
        return Ok(Payload {
            key: ContentKey::Json,
            value: json.to_string(),
        });
    }

    let mut params = brotli::enc::BrotliEncoderParams::default();
    params.quality = BROTLI_QUALITY;
    params.lgwin = BROTLI_LGWIN;

    let mut compressed = Vec::new();
    brotli::BrotliCompress(&mut json.as_bytes(), &mut compressed, &params)
        .map_err(EncodingError::Compress)?;

    Ok(Payload {
        key: ContentKey::Bin,
        value: BASE64.encode(compressed),
    })
}

/// Recover the JSON document from an encoded payload.
///
/// Used by tests and by anything that needs to verify a stored `.bin` value
/// round-trips to the original document.
pub fn decode(payload: &Payload) -> Result<Vec<u8>, EncodingError> {
    match payload.key {
        ContentKey::Json => Ok(payload.value.as_bytes().to_vec()),
        ContentKey::Bin => {
            let compressed = BASE64.decode(&payload.value)?;
            let mut decompressed = Vec::new();
            brotli::BrotliDecompress(&mut compressed.as_slice(), &mut decompressed)
                .map_err(EncodingError::Decompress)?;
            Ok(decompressed)
        }
    }
}
