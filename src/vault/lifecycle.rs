//! Vault lifecycle (C6): state machine, open pipeline, atomic commit.
//!
//! The vault is a single-writer object (spec.md §5): callers that share a
//! `Vault` across threads wrap it in `Arc<Mutex<Vault>>` themselves, the way
//! `mikeleppane-chamber`'s API layer wraps its vault handle, rather than the
//! handle locking itself. Every mutating method here takes `&mut self`, so
//! the borrow checker enforces exclusive access within a process.

use crate::vault::codec::{self, CodecError};
use crate::vault::entry_store::{self, EntryFields, EntryStoreError};
use crate::vault::envelope::{
    self, DecryptedPayload, EncryptedEnvelope, EnvelopeError, IntegrityBlock, SqlitePayload, VaultMetadata,
};
use crate::vault::header::{HeaderError, VaultHeader};
use crate::vault::io::{self, VaultIoError};
use crate::vault::keys::{self, KeyError};
use crate::vault::primitives::{self, CryptoError, SecretBytes};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    EntryStore(#[from] EntryStoreError),

    #[error(transparent)]
    Io(#[from] VaultIoError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("temp file error: {0}")]
    TempFile(#[from] std::io::Error),

    #[error("vault_id does not match expected id")]
    VaultIdMismatch,

    #[error("vault_version regressed relative to local state")]
    VaultVersionRollback,

    #[error("key_epoch regressed relative to local state")]
    KeyEpochRollback,

    #[error("illegal state transition from {from:?} to {to:?}")]
    IllegalTransition { from: VaultState, to: VaultState },

    #[error("operation requires state {expected:?}, found {actual:?}")]
    WrongState { expected: VaultState, actual: VaultState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Closed,
    Opening,
    Open,
    Dirty,
    Clean,
}

impl VaultState {
    /// The transition table of spec.md §4.6, checked once at every state
    /// change rather than scattered across call sites.
    pub fn can_transition_to(self, next: VaultState) -> bool {
        use VaultState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Dirty)
                | (Open, Clean)
                | (Open, Closed)
                | (Dirty, Clean)
                | (Dirty, Closed)
                | (Clean, Dirty)
                | (Clean, Closed)
        )
    }
}

fn transition(current: VaultState, next: VaultState) -> Result<VaultState, LifecycleError> {
    if current.can_transition_to(next) {
        Ok(next)
    } else {
        Err(LifecycleError::IllegalTransition { from: current, to: next })
    }
}

/// Trusted local state a caller persists between opens, used for rollback
/// and key-epoch downgrade protection.
#[derive(Debug, Clone, Default)]
pub struct OpenContext {
    pub expected_vault_id: Option<String>,
    pub last_seen_vault_version: u64,
    pub last_seen_key_epoch: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    header: VaultHeader,
    envelope: EncryptedEnvelope,
}

/// In-memory handle for an open vault.
#[derive(Debug)]
pub struct Vault {
    state: VaultState,
    vault_path: PathBuf,
    header: VaultHeader,
    vault_key: SecretBytes,
    wrapped_vault_key: keys::WrappedVaultKey,
    device_id: String,
    created_by: String,
    last_writer: String,
    db_path: PathBuf,
    conn: Connection,
    cached_db_bytes: Vec<u8>,
}

impl Vault {
    pub fn state(&self) -> VaultState {
        self.state
    }

    pub fn vault_id(&self) -> &str {
        &self.header.vault_id
    }

    pub fn vault_version(&self) -> u64 {
        self.header.vault_version
    }

    pub fn key_epoch(&self) -> u64 {
        self.header.key_epoch
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Parameters for creating a brand new vault file (spec.md §8 scenario 1:
/// "create-open round trip"). Not itself a named component in spec.md's
/// component table, but the open and commit pipelines both presuppose a
/// first on-disk version to exist.
#[derive(Debug, Clone)]
pub struct NewVaultParams {
    pub vault_id: String,
    pub device_id: String,
    pub kdf: crate::vault::header::KdfParams,
}

impl Vault {
    /// Derives the master key and vault key, builds a fresh header and
    /// payload at `vault_version = 1`, `key_epoch = 1`, and writes the
    /// result atomically. Does not return a handle; call `open` afterward,
    /// mirroring spec.md's "commit-then-open" phrasing.
    pub fn create(
        vault_path: &Path,
        password: &[u8],
        params: NewVaultParams,
        master_key_params: primitives::Argon2Params,
        now: i64,
    ) -> Result<(), LifecycleError> {
        let master_key = keys::derive_master_key(password, &params.kdf.salt, master_key_params)?;
        let kek = keys::derive_kek(&master_key)?;
        let vault_key = keys::generate_vault_key()?;
        let wrapped_vault_key = keys::wrap_vault_key(&vault_key, &kek, &params.vault_id, 1)?;

        let header = VaultHeader::new(params.vault_id.clone(), params.kdf, 1, 1, now);
        let header_aad = header.canonical_bytes(now)?;

        let db_bytes = new_empty_sqlite_bytes()?;
        let payload = DecryptedPayload {
            vault_metadata: VaultMetadata {
                vault_id: params.vault_id.clone(),
                vault_version: 1,
                key_epoch: 1,
                device_id: params.device_id.clone(),
                created_by: params.device_id.clone(),
                last_writer: params.device_id,
                integrity: IntegrityBlock {
                    payload_hash: primitives::hash(&db_bytes).to_vec(),
                },
            },
            sqlite: SqlitePayload {
                schema_version: 1,
                db_bytes,
            },
        };

        let envelope = envelope::encrypt_payload(&payload, &vault_key, &header_aad, wrapped_vault_key)?;
        let file = VaultFile { header, envelope };
        let file_bytes = codec::encode_canonical(&file)?;
        io::write_vault_bytes_atomic(vault_path, &file_bytes)?;
        Ok(())
    }

    /// Runs the open pipeline of spec.md §4.6 steps 1-11.
    pub fn open(
        vault_path: &Path,
        password: &[u8],
        ctx: &OpenContext,
        master_key_params: primitives::Argon2Params,
        now: i64,
    ) -> Result<Self, LifecycleError> {
        let mut state = VaultState::Closed;
        state = transition(state, VaultState::Opening)?;

        let open_result = Self::open_inner(vault_path, password, ctx, master_key_params, now);

        match open_result {
            Ok(mut vault) => {
                vault.state = transition(state, VaultState::Open)?;
                debug!(vault_id = %vault.header.vault_id, "vault opened");
                Ok(vault)
            }
            Err(err) => {
                transition(state, VaultState::Closed).ok();
                warn!(error = %err, "vault open failed");
                Err(err)
            }
        }
    }

    fn open_inner(
        vault_path: &Path,
        password: &[u8],
        ctx: &OpenContext,
        master_key_params: primitives::Argon2Params,
        now: i64,
    ) -> Result<Self, LifecycleError> {
        let file_bytes = io::read_vault_bytes(vault_path)?;
        let file: VaultFile = codec::decode_strict(&file_bytes)?;

        let header = file.header;
        header.validate(now)?;

        if let Some(expected) = &ctx.expected_vault_id
            && &header.vault_id != expected
        {
            return Err(LifecycleError::VaultIdMismatch);
        }
        if header.vault_version < ctx.last_seen_vault_version {
            return Err(LifecycleError::VaultVersionRollback);
        }
        if header.key_epoch < ctx.last_seen_key_epoch {
            return Err(LifecycleError::KeyEpochRollback);
        }

        let master_key = keys::derive_master_key(password, &header.kdf.salt, master_key_params)?;
        let kek = keys::derive_kek(&master_key)?;
        let header_aad = header.canonical_bytes(now)?;

        let wrapped_vault_key = file.envelope.wrapped_vault_key.clone();
        let vault_key = keys::unwrap_vault_key(&wrapped_vault_key, &kek, &header.vault_id, header.key_epoch)?;

        let envelope_bytes = file.envelope.encode_canonical()?;
        let (payload, _wrapped_vault_key_again) = envelope::decrypt_payload(&envelope_bytes, &vault_key, &header_aad)?;

        envelope::validate_metadata(
            &payload,
            &header.vault_id,
            header.vault_version,
            header.key_epoch,
            ctx.expected_vault_id.as_deref(),
            ctx.last_seen_vault_version,
            ctx.last_seen_key_epoch,
            &payload.sqlite.db_bytes,
        )?;

        let db_path = materialise_temp_db(&payload.sqlite.db_bytes)?;
        let conn = Connection::open(&db_path)?;
        entry_store::migrate(&conn)?;

        Ok(Vault {
            state: VaultState::Opening,
            vault_path: vault_path.to_path_buf(),
            header,
            vault_key,
            wrapped_vault_key,
            device_id: payload.vault_metadata.device_id,
            created_by: payload.vault_metadata.created_by,
            last_writer: payload.vault_metadata.last_writer,
            db_path,
            conn,
            cached_db_bytes: payload.sqlite.db_bytes,
        })
    }

    /// Marks the in-memory vault dirty; entry mutations call this after
    /// writing through `self.connection()`.
    pub fn mark_dirty(&mut self) -> Result<(), LifecycleError> {
        if self.state != VaultState::Dirty {
            self.state = transition(self.state, VaultState::Dirty)?;
        }
        Ok(())
    }

    pub fn create_entry(&mut self, entry_id: &str, fields: &EntryFields, now: i64) -> Result<(), LifecycleError> {
        entry_store::create_entry(&self.conn, &self.vault_key, &self.header.vault_id, entry_id, fields, now)?;
        self.mark_dirty()
    }

    pub fn read_entry(&self, entry_id: &str) -> Result<entry_store::EntryRecord, LifecycleError> {
        Ok(entry_store::read_entry(&self.conn, &self.vault_key, &self.header.vault_id, entry_id)?)
    }

    pub fn update_entry(&mut self, entry_id: &str, fields: &EntryFields, now: i64) -> Result<(), LifecycleError> {
        entry_store::update_entry(&self.conn, &self.vault_key, &self.header.vault_id, entry_id, fields, now)?;
        self.mark_dirty()
    }

    pub fn delete_entry(&mut self, entry_id: &str) -> Result<(), LifecycleError> {
        entry_store::delete_entry(&self.conn, entry_id)?;
        self.mark_dirty()
    }

    pub fn list_entry_ids(&self) -> Result<Vec<String>, LifecycleError> {
        Ok(entry_store::list_entry_ids(&self.conn)?)
    }

    /// Runs the commit pipeline of spec.md §4.6 steps 1-9. Only valid from
    /// `Dirty`.
    pub fn commit(&mut self, writer_id: &str, now: i64) -> Result<(), LifecycleError> {
        if self.state != VaultState::Dirty {
            return Err(LifecycleError::WrongState {
                expected: VaultState::Dirty,
                actual: self.state,
            });
        }

        let fresh_db_bytes = fs::read(&self.db_path)?;

        self.header.vault_version += 1;
        self.header.last_modified = now;

        let integrity_hash = primitives::hash(&fresh_db_bytes);
        self.last_writer = writer_id.to_string();

        let payload = DecryptedPayload {
            vault_metadata: VaultMetadata {
                vault_id: self.header.vault_id.clone(),
                vault_version: self.header.vault_version,
                key_epoch: self.header.key_epoch,
                device_id: self.device_id.clone(),
                created_by: self.created_by.clone(),
                last_writer: self.last_writer.clone(),
                integrity: IntegrityBlock {
                    payload_hash: integrity_hash.to_vec(),
                },
            },
            sqlite: SqlitePayload {
                schema_version: 1,
                db_bytes: fresh_db_bytes.clone(),
            },
        };

        let header_aad = self.header.canonical_bytes(now)?;
        let envelope = envelope::encrypt_payload(&payload, &self.vault_key, &header_aad, self.wrapped_vault_key.clone())?;

        let file = VaultFile {
            header: self.header.clone(),
            envelope,
        };
        let file_bytes = codec::encode_canonical(&file)?;

        io::write_vault_bytes_atomic(&self.vault_path, &file_bytes)?;

        self.cached_db_bytes = fresh_db_bytes;
        self.state = transition(self.state, VaultState::Clean)?;
        debug!(vault_id = %self.header.vault_id, vault_version = self.header.vault_version, "vault committed");
        Ok(())
    }

    /// Rotates the vault key's wrapping KEK (spec.md §4.3), bumping
    /// `key_epoch`. Does not itself commit; callers must `mark_dirty` and
    /// `commit` afterward.
    pub fn rotate_key(&mut self, new_password: &[u8], master_key_params: primitives::Argon2Params) -> Result<(), LifecycleError> {
        let new_master_key = keys::derive_master_key(new_password, &self.header.kdf.salt, master_key_params)?;
        let new_kek = keys::derive_kek(&new_master_key)?;

        let (rewrapped, new_epoch) = keys::rotate_vault_key(&self.vault_key, &new_kek, &self.header.vault_id, self.header.key_epoch)?;
        self.wrapped_vault_key = rewrapped;
        self.header.key_epoch = new_epoch;
        Ok(())
    }

    /// Closes the database handle, deletes the temp database file, and
    /// transitions to `Closed`. Callers must not call this twice.
    pub fn close(mut self) -> Result<(), LifecycleError> {
        self.state = transition(self.state, VaultState::Closed)?;
        let db_path = self.db_path.clone();
        drop(self);
        let _ = fs::remove_file(&db_path);
        Ok(())
    }
}

/// Produces the bytes of a freshly migrated, empty SQLite database, used as
/// the seed payload for a brand new vault.
fn new_empty_sqlite_bytes() -> Result<Vec<u8>, LifecycleError> {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("passworder-core-seed-{}.sqlite3", uuid::Uuid::new_v4()));
    let conn = Connection::open(&path)?;
    entry_store::migrate(&conn)?;
    drop(conn);
    let bytes = fs::read(&path)?;
    let _ = fs::remove_file(&path);
    Ok(bytes)
}

fn materialise_temp_db(db_bytes: &[u8]) -> Result<PathBuf, LifecycleError> {
    let dir = std::env::temp_dir();
    let file_name = format!("passworder-core-{}.sqlite3", uuid::Uuid::new_v4());
    let path = dir.join(file_name);
    fs::write(&path, db_bytes)?;
    Ok(path)
}
