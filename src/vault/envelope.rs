//! Envelope and decrypted payload (C4, envelope half).
//!
//! `WrappedVaultKey` is carried as a sibling field of the ciphertext rather
//! than nested inside the encrypted payload: unwrapping the vault key never
//! requires decrypting the payload first, so there is no two-phase decrypt.
//! See DESIGN.md for the full rationale.

use crate::vault::codec::{self, CodecError};
use crate::vault::keys::{KeyError, WrappedVaultKey};
use crate::vault::primitives::{self, CryptoError, SecretBytes, XCHACHA_NONCE_LEN};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("envelope ciphertext is empty")]
    EmptyCiphertext,

    #[error("payload decryption failed")]
    AuthFailed,

    #[error("vault_id mismatch between payload and header")]
    VaultIdMismatch,

    #[error("vault_version mismatch between payload and header")]
    VaultVersionMismatch,

    #[error("key_epoch mismatch between payload and header")]
    KeyEpochMismatch,

    #[error("device identity field must not be empty")]
    EmptyDeviceIdentityField,

    #[error("integrity hash is empty")]
    EmptyIntegrityHash,

    #[error("integrity hash does not match embedded database bytes")]
    IntegrityMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityBlock {
    pub payload_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub vault_id: String,
    pub vault_version: u64,
    pub key_epoch: u64,
    pub device_id: String,
    pub created_by: String,
    pub last_writer: String,
    pub integrity: IntegrityBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlitePayload {
    pub schema_version: u32,
    pub db_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedPayload {
    pub vault_metadata: VaultMetadata,
    pub sqlite: SqlitePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub wrapped_vault_key: WrappedVaultKey,
}

impl EncryptedEnvelope {
    pub fn decode_strict(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(codec::decode_strict(bytes)?)
    }

    pub fn encode_canonical(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(codec::encode_canonical(self)?)
    }
}

/// Canonically encodes `payload`, draws a fresh nonce, AEAD-encrypts under
/// `vault_key` with `header_aad`, and wraps the result alongside
/// `wrapped_vault_key` as the envelope.
pub fn encrypt_payload(
    payload: &DecryptedPayload,
    vault_key: &SecretBytes,
    header_aad: &[u8],
    wrapped_vault_key: WrappedVaultKey,
) -> Result<EncryptedEnvelope, EnvelopeError> {
    let encoded = codec::encode_canonical(payload)?;
    let nonce = primitives::random_bytes::<XCHACHA_NONCE_LEN>()?;
    let ciphertext = primitives::aead_encrypt(vault_key.expose_secret(), &nonce, &encoded, header_aad)?;

    Ok(EncryptedEnvelope {
        nonce: nonce.to_vec(),
        ciphertext,
        wrapped_vault_key,
    })
}

/// Strict-decodes the envelope, validates nonce/ciphertext shape,
/// AEAD-decrypts under `vault_key` with `header_aad` (opaque failure), then
/// strict-decodes the inner payload.
pub fn decrypt_payload(
    envelope_bytes: &[u8],
    vault_key: &SecretBytes,
    header_aad: &[u8],
) -> Result<(DecryptedPayload, WrappedVaultKey), EnvelopeError> {
    let envelope = EncryptedEnvelope::decode_strict(envelope_bytes)?;
    if envelope.ciphertext.is_empty() {
        return Err(EnvelopeError::EmptyCiphertext);
    }
    let nonce = primitives::nonce_from_slice(&envelope.nonce)?;

    let plaintext = primitives::aead_decrypt(vault_key.expose_secret(), &nonce, &envelope.ciphertext, header_aad)
        .map_err(|_| EnvelopeError::AuthFailed)?;

    let payload: DecryptedPayload = codec::decode_strict(&plaintext)?;
    Ok((payload, envelope.wrapped_vault_key))
}

/// Validates `payload.vault_metadata` against the header and trusted local
/// state (spec.md §4.6 metadata validation), independent of decryption.
pub fn validate_metadata(
    payload: &DecryptedPayload,
    header_vault_id: &str,
    header_vault_version: u64,
    header_key_epoch: u64,
    expected_vault_id: Option<&str>,
    last_seen_vault_version: u64,
    last_seen_key_epoch: u64,
    db_bytes: &[u8],
) -> Result<(), EnvelopeError> {
    let meta = &payload.vault_metadata;

    if meta.vault_id != header_vault_id {
        return Err(EnvelopeError::VaultIdMismatch);
    }
    if let Some(expected) = expected_vault_id
        && meta.vault_id != expected
    {
        return Err(EnvelopeError::VaultIdMismatch);
    }
    if meta.vault_version != header_vault_version || meta.vault_version < last_seen_vault_version {
        return Err(EnvelopeError::VaultVersionMismatch);
    }
    if meta.key_epoch != header_key_epoch || meta.key_epoch < last_seen_key_epoch {
        return Err(EnvelopeError::KeyEpochMismatch);
    }
    if meta.device_id.is_empty() || meta.created_by.is_empty() || meta.last_writer.is_empty() {
        return Err(EnvelopeError::EmptyDeviceIdentityField);
    }
    if meta.integrity.payload_hash.is_empty() {
        return Err(EnvelopeError::EmptyIntegrityHash);
    }

    let computed = primitives::hash(db_bytes);
    if !primitives::fixed_time_eq(&meta.integrity.payload_hash, &computed) {
        return Err(EnvelopeError::IntegrityMismatch);
    }

    Ok(())
}
