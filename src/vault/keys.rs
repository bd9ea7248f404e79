//! Key hierarchy (C3): master key → KEK → vault key → per-entry keys.
//!
//! Modeled as pure functions over byte slices, grounded on
//! `original_source/internal/keys/master.go` and `vault_key.go`, in the
//! idiom of `examples/joojf-passworder/src/vault/crypto.rs`.

use crate::vault::codec::{self, CodecError};
use crate::vault::primitives::{
    self, Argon2Params, CryptoError, SecretBytes, XCHACHA_NONCE_LEN,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MASTER_KEY_MIN_MEMORY_KIB: u32 = 128 * 1024;
pub const MASTER_KEY_MIN_ITERATIONS: u32 = 3;
pub const MASTER_KEY_MIN_PARALLELISM: u32 = 4;
pub const MASTER_KEY_LEN: u32 = 32;

pub const VAULT_KEY_LEN: usize = 32;
pub const ENTRY_KEY_LEN: usize = 32;

const HKDF_INFO_KEK: &[u8] = b"pmgr:vault-key-wrap";
const VK_WRAP_AAD_PREFIX: &[u8] = b"pmgr:vk-wrap";
const ENTRY_KEY_AAD_PREFIX: &[u8] = b"pmgr:entry-key";

const WRAP_ALGO_XCHACHA20POLY1305: &str = "xchacha20-poly1305";
const WRAPPED_VAULT_KEY_VERSION: u8 = 1;
const ENTRY_KEY_ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("master password cannot be empty")]
    EmptyPassword,

    #[error("argon2 memory below floor ({0} KiB < {MASTER_KEY_MIN_MEMORY_KIB})")]
    MemoryTooLow(u32),

    #[error("argon2 iterations below floor ({0} < {MASTER_KEY_MIN_ITERATIONS})")]
    IterationsTooLow(u32),

    #[error("argon2 parallelism below floor ({0} < {MASTER_KEY_MIN_PARALLELISM})")]
    ParallelismTooLow(u32),

    #[error("master key output length must be {MASTER_KEY_LEN}")]
    WrongOutputLength,

    #[error("vault_id must not be empty")]
    EmptyVaultId,

    #[error("entry_id must not be empty")]
    EmptyEntryId,

    #[error("key_epoch must be >= 1")]
    ZeroKeyEpoch,

    #[error("unsupported wrapped vault key version")]
    UnsupportedWrapVersion,

    #[error("unsupported wrap algorithm")]
    UnsupportedWrapAlgo,

    #[error("key_epoch mismatch against expected epoch")]
    KeyEpochMismatch,

    #[error("unsupported entry key envelope version")]
    UnsupportedEntryKeyVersion,

    #[error("unsupported entry key algorithm")]
    UnsupportedEntryKeyAlgo,

    #[error("vault key unwrap failed")]
    VaultKeyUnwrapFailed,

    #[error("entry key unwrap failed")]
    EntryKeyUnwrapFailed,

    #[error("decrypted key has the wrong length")]
    WrongKeyLength,
}

/// Derives the 32-byte master key from the user's password via Argon2id,
/// enforcing the floors in spec.md §4.3 (stricter than the bare primitive's
/// only-non-empty-and-16-byte-salt checks).
pub fn derive_master_key(
    password: &[u8],
    salt: &[u8],
    params: Argon2Params,
) -> Result<SecretBytes, KeyError> {
    if password.is_empty() {
        return Err(KeyError::EmptyPassword);
    }
    if params.memory_kib < MASTER_KEY_MIN_MEMORY_KIB {
        return Err(KeyError::MemoryTooLow(params.memory_kib));
    }
    if params.iterations < MASTER_KEY_MIN_ITERATIONS {
        return Err(KeyError::IterationsTooLow(params.iterations));
    }
    if params.parallelism < MASTER_KEY_MIN_PARALLELISM {
        return Err(KeyError::ParallelismTooLow(params.parallelism));
    }
    if params.output_len != MASTER_KEY_LEN {
        return Err(KeyError::WrongOutputLength);
    }

    Ok(primitives::derive_argon2id(password, salt, params)?)
}

/// Derives the key-encryption key (KEK) from the master key.
pub fn derive_kek(master_key: &SecretBytes) -> Result<SecretBytes, KeyError> {
    Ok(primitives::hkdf_expand(master_key.expose_secret(), HKDF_INFO_KEK, 32)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedVaultKey {
    pub v: u8,
    pub algo: String,
    pub nonce: Vec<u8>,
    pub ct: Vec<u8>,
    pub key_epoch: u64,
}

/// `"pmgr:vk-wrap" || vault_id || u64_be(key_epoch)`, bit-exact per spec.md
/// §6. No length prefix: a single variable-length field immediately
/// followed by a fixed 8-byte epoch has no parsing ambiguity to guard
/// against.
fn build_vk_wrap_aad(vault_id: &str, key_epoch: u64) -> Result<Vec<u8>, KeyError> {
    if vault_id.is_empty() {
        return Err(KeyError::EmptyVaultId);
    }
    let mut aad = Vec::with_capacity(VK_WRAP_AAD_PREFIX.len() + vault_id.len() + 8);
    aad.extend_from_slice(VK_WRAP_AAD_PREFIX);
    aad.extend_from_slice(vault_id.as_bytes());
    aad.extend_from_slice(&key_epoch.to_be_bytes());
    Ok(aad)
}

/// Wraps `vault_key` under `kek`, binding to `vault_id` and `key_epoch`.
/// `key_epoch` must be non-zero.
pub fn wrap_vault_key(
    vault_key: &SecretBytes,
    kek: &SecretBytes,
    vault_id: &str,
    key_epoch: u64,
) -> Result<WrappedVaultKey, KeyError> {
    if key_epoch == 0 {
        return Err(KeyError::ZeroKeyEpoch);
    }

    let nonce = primitives::random_bytes::<XCHACHA_NONCE_LEN>()?;
    let aad = build_vk_wrap_aad(vault_id, key_epoch)?;
    let ct = primitives::aead_encrypt(kek.expose_secret(), &nonce, vault_key.expose_secret(), &aad)?;

    Ok(WrappedVaultKey {
        v: WRAPPED_VAULT_KEY_VERSION,
        algo: WRAP_ALGO_XCHACHA20POLY1305.to_string(),
        nonce: nonce.to_vec(),
        ct,
        key_epoch,
    })
}

/// Unwraps a vault key record, verifying structural fields and that the
/// persisted `key_epoch` equals `expected_epoch` *before* attempting AEAD
/// decryption (spec.md §4.3).
pub fn unwrap_vault_key(
    wrapped: &WrappedVaultKey,
    kek: &SecretBytes,
    vault_id: &str,
    expected_epoch: u64,
) -> Result<SecretBytes, KeyError> {
    if wrapped.v != WRAPPED_VAULT_KEY_VERSION {
        return Err(KeyError::UnsupportedWrapVersion);
    }
    if wrapped.algo != WRAP_ALGO_XCHACHA20POLY1305 {
        return Err(KeyError::UnsupportedWrapAlgo);
    }
    let nonce = primitives::nonce_from_slice(&wrapped.nonce)?;
    if wrapped.key_epoch != expected_epoch {
        return Err(KeyError::KeyEpochMismatch);
    }

    let aad = build_vk_wrap_aad(vault_id, wrapped.key_epoch)?;
    let vault_key = primitives::aead_decrypt(kek.expose_secret(), &nonce, &wrapped.ct, &aad)
        .map_err(|_| KeyError::VaultKeyUnwrapFailed)?;

    if vault_key.len() != VAULT_KEY_LEN {
        return Err(KeyError::WrongKeyLength);
    }
    Ok(SecretBytes::from(vault_key))
}

/// Re-wraps the same vault key bytes under a freshly derived KEK, bumping
/// `key_epoch` by one. Never mutates the vault key material itself.
pub fn rotate_vault_key(
    vault_key: &SecretBytes,
    new_kek: &SecretBytes,
    vault_id: &str,
    old_epoch: u64,
) -> Result<(WrappedVaultKey, u64), KeyError> {
    if old_epoch == 0 {
        return Err(KeyError::ZeroKeyEpoch);
    }
    let new_epoch = old_epoch + 1;
    let wrapped = wrap_vault_key(vault_key, new_kek, vault_id, new_epoch)?;
    Ok((wrapped, new_epoch))
}

pub fn generate_vault_key() -> Result<SecretBytes, KeyError> {
    Ok(SecretBytes::from(primitives::random_bytes::<VAULT_KEY_LEN>()?.to_vec()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedEntryKey {
    pub v: u8,
    pub algo: String,
    pub nonce: Vec<u8>,
    pub ct: Vec<u8>,
}

/// `"pmgr:entry-key" || vault_id || entry_id`, bit-exact per spec.md §6.
/// No length prefix, matching the literal spec byte sequence (the
/// length-prefixing used in `entry_store::build_field_aad` is a
/// deliberate, documented deviation scoped to that function only; it
/// does not extend here).
fn build_entry_key_aad(vault_id: &str, entry_id: &str) -> Result<Vec<u8>, KeyError> {
    if vault_id.is_empty() {
        return Err(KeyError::EmptyVaultId);
    }
    if entry_id.is_empty() {
        return Err(KeyError::EmptyEntryId);
    }
    let mut aad = Vec::with_capacity(ENTRY_KEY_AAD_PREFIX.len() + vault_id.len() + entry_id.len());
    aad.extend_from_slice(ENTRY_KEY_AAD_PREFIX);
    aad.extend_from_slice(vault_id.as_bytes());
    aad.extend_from_slice(entry_id.as_bytes());
    Ok(aad)
}

pub fn generate_entry_key() -> Result<SecretBytes, KeyError> {
    Ok(SecretBytes::from(primitives::random_bytes::<ENTRY_KEY_LEN>()?.to_vec()))
}

/// Wraps a fresh entry key under the vault key, bound to `vault_id` and
/// `entry_id`.
pub fn wrap_entry_key(
    entry_key: &SecretBytes,
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
) -> Result<WrappedEntryKey, KeyError> {
    let nonce = primitives::random_bytes::<XCHACHA_NONCE_LEN>()?;
    let aad = build_entry_key_aad(vault_id, entry_id)?;
    let ct = primitives::aead_encrypt(vault_key.expose_secret(), &nonce, entry_key.expose_secret(), &aad)?;

    Ok(WrappedEntryKey {
        v: ENTRY_KEY_ENVELOPE_VERSION,
        algo: WRAP_ALGO_XCHACHA20POLY1305.to_string(),
        nonce: nonce.to_vec(),
        ct,
    })
}

pub fn unwrap_entry_key(
    wrapped: &WrappedEntryKey,
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
) -> Result<SecretBytes, KeyError> {
    if wrapped.v != ENTRY_KEY_ENVELOPE_VERSION {
        return Err(KeyError::UnsupportedEntryKeyVersion);
    }
    if wrapped.algo != WRAP_ALGO_XCHACHA20POLY1305 {
        return Err(KeyError::UnsupportedEntryKeyAlgo);
    }
    let nonce = primitives::nonce_from_slice(&wrapped.nonce)?;
    let aad = build_entry_key_aad(vault_id, entry_id)?;

    let entry_key = primitives::aead_decrypt(vault_key.expose_secret(), &nonce, &wrapped.ct, &aad)
        .map_err(|_| KeyError::EntryKeyUnwrapFailed)?;

    if entry_key.len() != ENTRY_KEY_LEN {
        return Err(KeyError::WrongKeyLength);
    }
    Ok(SecretBytes::from(entry_key))
}

/// Canonically encodes a `WrappedVaultKey`, for embedding inside the
/// envelope (see `vault::envelope`).
pub fn encode_wrapped_vault_key(wrapped: &WrappedVaultKey) -> Result<Vec<u8>, KeyError> {
    Ok(codec::encode_canonical(wrapped)?)
}

pub fn decode_wrapped_vault_key(bytes: &[u8]) -> Result<WrappedVaultKey, KeyError> {
    Ok(codec::decode_strict(bytes)?)
}
