//! Crate-root error type (spec.md §7): every submodule keeps its own narrow
//! error enum; this folds them into the six kinds callers actually need to
//! branch on. AEAD failures from any layer collapse into `AuthFailed`
//! without disclosing which layer failed.

use crate::config::ConfigError;
use crate::vault::codec::CodecError;
use crate::vault::entry_store::EntryStoreError;
use crate::vault::envelope::EnvelopeError;
use crate::vault::header::HeaderError;
use crate::vault::io::VaultIoError;
use crate::vault::keys::KeyError;
use crate::vault::lifecycle::LifecycleError;
use crate::vault::primitives::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultCoreError {
    #[error("invalid vault: {0}")]
    InvalidVault(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("rollback detected: {0}")]
    RollbackDetected(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CryptoError> for VaultCoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Argon2(_) | CryptoError::ShortRead => VaultCoreError::CryptoFailure(err.to_string()),
            CryptoError::Aead => VaultCoreError::AuthFailed,
            _ => VaultCoreError::CryptoFailure(err.to_string()),
        }
    }
}

impl From<CodecError> for VaultCoreError {
    fn from(err: CodecError) -> Self {
        VaultCoreError::CorruptData(err.to_string())
    }
}

impl From<KeyError> for VaultCoreError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::VaultKeyUnwrapFailed | KeyError::EntryKeyUnwrapFailed => VaultCoreError::AuthFailed,
            KeyError::KeyEpochMismatch => VaultCoreError::RollbackDetected(err.to_string()),
            KeyError::Crypto(inner) => inner.into(),
            KeyError::Codec(inner) => inner.into(),
            _ => VaultCoreError::InvalidVault(err.to_string()),
        }
    }
}

impl From<HeaderError> for VaultCoreError {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::Codec(inner) => inner.into(),
            _ => VaultCoreError::InvalidVault(err.to_string()),
        }
    }
}

impl From<EnvelopeError> for VaultCoreError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::AuthFailed => VaultCoreError::AuthFailed,
            EnvelopeError::IntegrityMismatch => VaultCoreError::CorruptData(err.to_string()),
            EnvelopeError::VaultVersionMismatch | EnvelopeError::KeyEpochMismatch => {
                VaultCoreError::RollbackDetected(err.to_string())
            }
            EnvelopeError::Codec(inner) => inner.into(),
            EnvelopeError::Crypto(inner) => inner.into(),
            EnvelopeError::Key(inner) => inner.into(),
            _ => VaultCoreError::InvalidVault(err.to_string()),
        }
    }
}

impl From<EntryStoreError> for VaultCoreError {
    fn from(err: EntryStoreError) -> Self {
        match err {
            EntryStoreError::AuthFailed => VaultCoreError::AuthFailed,
            EntryStoreError::Codec(inner) => inner.into(),
            EntryStoreError::Crypto(inner) => inner.into(),
            EntryStoreError::Key(inner) => inner.into(),
            EntryStoreError::Sqlite(_) => VaultCoreError::CorruptData(err.to_string()),
            _ => VaultCoreError::InvalidVault(err.to_string()),
        }
    }
}

impl From<VaultIoError> for VaultCoreError {
    fn from(err: VaultIoError) -> Self {
        VaultCoreError::InvalidVault(err.to_string())
    }
}

impl From<LifecycleError> for VaultCoreError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::VaultVersionRollback | LifecycleError::KeyEpochRollback => {
                VaultCoreError::RollbackDetected(err.to_string())
            }
            LifecycleError::VaultIdMismatch => VaultCoreError::InvalidVault(err.to_string()),
            LifecycleError::Crypto(inner) => inner.into(),
            LifecycleError::Codec(inner) => inner.into(),
            LifecycleError::Key(inner) => inner.into(),
            LifecycleError::Header(inner) => inner.into(),
            LifecycleError::Envelope(inner) => inner.into(),
            LifecycleError::EntryStore(inner) => inner.into(),
            LifecycleError::Io(inner) => inner.into(),
            LifecycleError::Sqlite(_) | LifecycleError::TempFile(_) => VaultCoreError::CorruptData(err.to_string()),
            LifecycleError::IllegalTransition { .. } | LifecycleError::WrongState { .. } => {
                VaultCoreError::InvalidVault(err.to_string())
            }
        }
    }
}

impl From<ConfigError> for VaultCoreError {
    fn from(err: ConfigError) -> Self {
        VaultCoreError::Config(err.to_string())
    }
}
