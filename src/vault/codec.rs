//! Canonical binary codec (C2).
//!
//! The header and envelope are used both as AEAD associated data and as
//! integrity-hashed material, so the encoding must be deterministic:
//! identical values always produce identical bytes, and decoding rejects
//! anything that isn't exactly what the encoder would have produced.
//!
//! This mirrors `original_source/internal/encoding/cbor.go`'s use of
//! `fxamacker/cbor`'s canonical mode, built here on `ciborium`: sorted map
//! keys, no indefinite-length items, no semantic tags, no trailing bytes.

use ciborium::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("canonical encode failed: {0}")]
    Encode(String),

    #[error("strict decode failed: {0}")]
    Decode(String),

    #[error("trailing bytes after top-level value")]
    TrailingBytes,

    #[error("duplicate map key in decoded value")]
    DuplicateKey,

    #[error("indefinite-length item rejected")]
    IndefiniteLength,

    #[error("semantic tag rejected")]
    SemanticTag,
}

/// Encodes `value` as canonical CBOR: map keys sorted by byte order of
/// their encoded form, no indefinite-length items, shortest float
/// representation.
pub fn encode_canonical<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let as_value = Value::serialized(value).map_err(|e| CodecError::Encode(e.to_string()))?;
    let canonical = canonicalize(as_value)?;

    let mut buf = Vec::new();
    ciborium::into_writer(&canonical, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes `data` strictly: rejects duplicate map keys, indefinite-length
/// items, semantic tags, and any trailing bytes after the top-level value.
pub fn decode_strict<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let mut cursor = std::io::Cursor::new(data);
    let value: Value =
        ciborium::from_reader(&mut cursor).map_err(|e| CodecError::Decode(e.to_string()))?;

    if (cursor.position() as usize) != data.len() {
        return Err(CodecError::TrailingBytes);
    }

    reject_tags_and_check_duplicates(&value)?;

    value
        .deserialized()
        .map_err(|e| CodecError::Decode(e.to_string()))
}

/// Recursively sorts map keys into canonical (RFC 8949 §4.2.1) order: by
/// encoded-key length first, then lexicographically.
fn canonicalize(value: Value) -> Result<Value, CodecError> {
    match value {
        Value::Map(entries) => {
            let mut encoded_entries = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let k = canonicalize(k)?;
                let v = canonicalize(v)?;
                let mut key_bytes = Vec::new();
                ciborium::into_writer(&k, &mut key_bytes)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
                encoded_entries.push((key_bytes, k, v));
            }
            encoded_entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(Value::Map(
                encoded_entries.into_iter().map(|(_, k, v)| (k, v)).collect(),
            ))
        }
        Value::Array(items) => Ok(Value::Array(
            items.into_iter().map(canonicalize).collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

/// `ciborium::Value` has already discarded indefinite-length framing and
/// semantic tags by the time it's a `Value` — this walks the tree to
/// reject any `Value::Tag` node (ciborium decodes tags into a variant
/// rather than erroring, so canonical-codec strictness is enforced here)
/// and any map with a duplicate key.
fn reject_tags_and_check_duplicates(value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Tag(_, _) => Err(CodecError::SemanticTag),
        Value::Map(entries) => {
            let mut seen = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let mut key_bytes = Vec::new();
                ciborium::into_writer(k, &mut key_bytes)
                    .map_err(|e| CodecError::Decode(e.to_string()))?;
                if seen.contains(&key_bytes) {
                    return Err(CodecError::DuplicateKey);
                }
                seen.push(key_bytes);
                reject_tags_and_check_duplicates(k)?;
                reject_tags_and_check_duplicates(v)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                reject_tags_and_check_duplicates(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
