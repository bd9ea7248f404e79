//! Vault header (C4, header half): plaintext, authenticated metadata that
//! doubles as the envelope's AEAD associated data.
//!
//! Grounded on `original_source/internal/vault/header.go`'s invariants, coded
//! in the style of `examples/joojf-passworder/src/vault/format_v1.rs`.

use crate::vault::codec::{self, CodecError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAGIC: &str = "PMGRVAULT";
pub const FORMAT_VERSION: u32 = 1;
pub const KDF_ALGO: &str = "argon2id";
pub const CIPHER_ALGO: &str = "xchacha20-poly1305";

pub const HEADER_KDF_MIN_MEMORY_KIB: u32 = 65536;
pub const HEADER_KDF_MIN_ITERATIONS: u32 = 1;
pub const HEADER_KDF_MIN_PARALLELISM: u32 = 1;
pub const HEADER_SALT_MIN_LEN: usize = 16;
pub const HEADER_SALT_MAX_LEN: usize = 32;

const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("wrong magic string")]
    WrongMagic,

    #[error("unsupported format version")]
    WrongVersion,

    #[error("unsupported kdf algorithm")]
    WrongKdfAlgo,

    #[error("salt length out of bounds")]
    SaltLengthOutOfBounds,

    #[error("kdf memory below floor ({0} KiB < {HEADER_KDF_MIN_MEMORY_KIB})")]
    MemoryTooLow(u32),

    #[error("kdf iterations below floor")]
    IterationsTooLow,

    #[error("kdf parallelism below floor")]
    ParallelismTooLow,

    #[error("unsupported cipher algorithm")]
    WrongCipherAlgo,

    #[error("vault_id must not be empty")]
    EmptyVaultId,

    #[error("key_epoch must be >= 1")]
    ZeroKeyEpoch,

    #[error("vault_version must be >= 1")]
    ZeroVaultVersion,

    #[error("created_at must be > 0")]
    ZeroCreatedAt,

    #[error("last_modified must be >= created_at")]
    LastModifiedBeforeCreated,

    #[error("timestamp more than {MAX_CLOCK_SKEW_SECS}s in the future")]
    TimestampInFuture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algo: String,
    pub salt: Vec<u8>,
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoParams {
    pub cipher: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHeader {
    pub magic: String,
    pub version: u32,
    pub kdf: KdfParams,
    pub crypto: CryptoParams,
    pub vault_id: String,
    pub key_epoch: u64,
    pub vault_version: u64,
    pub created_at: i64,
    pub last_modified: i64,
}

impl VaultHeader {
    pub fn new(
        vault_id: impl Into<String>,
        kdf: KdfParams,
        key_epoch: u64,
        vault_version: u64,
        created_at: i64,
    ) -> Self {
        Self {
            magic: MAGIC.to_string(),
            version: FORMAT_VERSION,
            kdf,
            crypto: CryptoParams {
                cipher: CIPHER_ALGO.to_string(),
            },
            vault_id: vault_id.into(),
            key_epoch,
            vault_version,
            created_at,
            last_modified: created_at,
        }
    }

    /// Enforces every invariant in spec.md §3 before the header is trusted
    /// as AEAD associated data.
    pub fn validate(&self, now: i64) -> Result<(), HeaderError> {
        if self.magic != MAGIC {
            return Err(HeaderError::WrongMagic);
        }
        if self.version != FORMAT_VERSION {
            return Err(HeaderError::WrongVersion);
        }
        if self.kdf.algo != KDF_ALGO {
            return Err(HeaderError::WrongKdfAlgo);
        }
        if self.kdf.salt.len() < HEADER_SALT_MIN_LEN || self.kdf.salt.len() > HEADER_SALT_MAX_LEN {
            return Err(HeaderError::SaltLengthOutOfBounds);
        }
        if self.kdf.memory < HEADER_KDF_MIN_MEMORY_KIB {
            return Err(HeaderError::MemoryTooLow(self.kdf.memory));
        }
        if self.kdf.iterations < HEADER_KDF_MIN_ITERATIONS {
            return Err(HeaderError::IterationsTooLow);
        }
        if self.kdf.parallelism < HEADER_KDF_MIN_PARALLELISM {
            return Err(HeaderError::ParallelismTooLow);
        }
        if self.crypto.cipher != CIPHER_ALGO {
            return Err(HeaderError::WrongCipherAlgo);
        }
        if self.vault_id.is_empty() {
            return Err(HeaderError::EmptyVaultId);
        }
        if self.key_epoch == 0 {
            return Err(HeaderError::ZeroKeyEpoch);
        }
        if self.vault_version == 0 {
            return Err(HeaderError::ZeroVaultVersion);
        }
        if self.created_at <= 0 {
            return Err(HeaderError::ZeroCreatedAt);
        }
        if self.last_modified < self.created_at {
            return Err(HeaderError::LastModifiedBeforeCreated);
        }
        if self.created_at > now + MAX_CLOCK_SKEW_SECS || self.last_modified > now + MAX_CLOCK_SKEW_SECS {
            return Err(HeaderError::TimestampInFuture);
        }
        Ok(())
    }

    /// Validates, then canonically encodes. This is the envelope AAD.
    pub fn canonical_bytes(&self, now: i64) -> Result<Vec<u8>, HeaderError> {
        self.validate(now)?;
        Ok(codec::encode_canonical(self)?)
    }

    pub fn decode_strict(bytes: &[u8]) -> Result<Self, HeaderError> {
        Ok(codec::decode_strict(bytes)?)
    }
}
