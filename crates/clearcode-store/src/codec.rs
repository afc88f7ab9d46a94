//! Gzip-compressed JSON codec used as the storage representation of item content.
//!
//! Content is serialized to compact JSON (object keys in sorted order, since
//! `serde_json::Map` is ordered) and then gzip-compressed. Output is
//! deterministic for identical input and compression level.

use crate::StoreError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

/// Serialize and compress a document.
pub fn encode(content: &Value) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(content)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decompress and parse a document. Fails with `CorruptPayload` on any
/// decompression or parse error.
pub fn decode(data: &[u8]) -> Result<Value, StoreError> {
    decode_for("", data)
}

pub(crate) fn decode_for(path: &str, data: &[u8]) -> Result<Value, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptPayload {
        path: path.to_owned(),
        reason,
    };
    let mut json = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut json)
        .map_err(|e| corrupt(format!("decompression failed: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| corrupt(format!("invalid JSON: {e}")))
}
