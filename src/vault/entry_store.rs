//! Entry store (C5): per-field, per-entry-key AEAD wrap/unwrap backed by the
//! embedded SQLite database.
//!
//! The relational schema is an implementation detail (spec.md's Non-goals
//! exclude "the relational schema beyond the fact that an opaque database
//! blob is stored"); the table shape here mirrors
//! `examples/mikeleppane-chamber/crates/vault/src/db.rs`'s `items`/`meta`
//! tables, adapted to five named fields plus a wrapped entry key column.

use crate::vault::codec::{self, CodecError};
use crate::vault::keys::{self, KeyError, WrappedEntryKey};
use crate::vault::primitives::{self, CryptoError, SecretBytes, XCHACHA_NONCE_LEN};
use rusqlite::{Connection, OptionalExtension, params};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FIELD_ENVELOPE_VERSION: u8 = 1;
const FIELD_AAD_PREFIX: &[u8] = b"pmgr:field";
const ENTRY_KEY_COLUMN: &str = "entry_key";

#[derive(Debug, Error)]
pub enum EntryStoreError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("entry {0} not found")]
    NotFound(String),

    #[error("field decryption failed")]
    AuthFailed,

    #[error("unsupported field envelope version")]
    UnsupportedFieldVersion,

    #[error("vault_id must not be empty")]
    EmptyVaultId,

    #[error("entry_id must not be empty")]
    EmptyEntryId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldEnvelope {
    v: u8,
    nonce: Vec<u8>,
    ct: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EntryFields {
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub entry_id: String,
    pub fields: EntryFields,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn migrate(conn: &Connection) -> Result<(), EntryStoreError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS entries (
            entry_id   TEXT PRIMARY KEY,
            entry_key  BLOB NOT NULL,
            title      BLOB NOT NULL,
            username   BLOB NOT NULL,
            password   BLOB NOT NULL,
            url        BLOB NOT NULL,
            notes      BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, EntryStoreError> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), EntryStoreError> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn build_field_aad(vault_id: &str, entry_id: &str, column_name: &str) -> Result<Vec<u8>, EntryStoreError> {
    if vault_id.is_empty() {
        return Err(EntryStoreError::EmptyVaultId);
    }
    if entry_id.is_empty() {
        return Err(EntryStoreError::EmptyEntryId);
    }
    let mut aad = Vec::with_capacity(
        FIELD_AAD_PREFIX.len() + 4 + vault_id.len() + 4 + entry_id.len() + 4 + column_name.len() + 1,
    );
    aad.extend_from_slice(FIELD_AAD_PREFIX);
    aad.extend_from_slice(&(vault_id.len() as u32).to_be_bytes());
    aad.extend_from_slice(vault_id.as_bytes());
    aad.extend_from_slice(&(entry_id.len() as u32).to_be_bytes());
    aad.extend_from_slice(entry_id.as_bytes());
    aad.extend_from_slice(&(column_name.len() as u32).to_be_bytes());
    aad.extend_from_slice(column_name.as_bytes());
    aad.push(FIELD_ENVELOPE_VERSION);
    Ok(aad)
}

fn wrap_field(
    plaintext: &str,
    key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
    column_name: &str,
) -> Result<Vec<u8>, EntryStoreError> {
    let nonce = primitives::random_bytes::<XCHACHA_NONCE_LEN>()?;
    let aad = build_field_aad(vault_id, entry_id, column_name)?;
    let ct = primitives::aead_encrypt(key.expose_secret(), &nonce, plaintext.as_bytes(), &aad)?;

    let envelope = FieldEnvelope {
        v: FIELD_ENVELOPE_VERSION,
        nonce: nonce.to_vec(),
        ct,
    };
    Ok(codec::encode_canonical(&envelope)?)
}

fn unwrap_field(
    blob: &[u8],
    key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
    column_name: &str,
) -> Result<String, EntryStoreError> {
    let envelope: FieldEnvelope = codec::decode_strict(blob)?;
    if envelope.v != FIELD_ENVELOPE_VERSION {
        return Err(EntryStoreError::UnsupportedFieldVersion);
    }
    let nonce = primitives::nonce_from_slice(&envelope.nonce)?;
    let aad = build_field_aad(vault_id, entry_id, column_name)?;

    let plaintext = primitives::aead_decrypt(key.expose_secret(), &nonce, &envelope.ct, &aad)
        .map_err(|_| EntryStoreError::AuthFailed)?;
    String::from_utf8(plaintext).map_err(|_| EntryStoreError::AuthFailed)
}

/// Generates a fresh entry key, wraps it under the vault key, wraps each
/// field under the entry key, and inserts the row.
pub fn create_entry(
    conn: &Connection,
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
    fields: &EntryFields,
    now: i64,
) -> Result<(), EntryStoreError> {
    let entry_key = keys::generate_entry_key()?;
    let wrapped_entry_key = keys::wrap_entry_key(&entry_key, vault_key, vault_id, entry_id)?;
    let entry_key_column = encode_wrapped_entry_key_column(&wrapped_entry_key, vault_key, vault_id, entry_id)?;

    let title = wrap_field(&fields.title, &entry_key, vault_id, entry_id, "title")?;
    let username = wrap_field(&fields.username, &entry_key, vault_id, entry_id, "username")?;
    let password = wrap_field(&fields.password, &entry_key, vault_id, entry_id, "password")?;
    let url = wrap_field(&fields.url, &entry_key, vault_id, entry_id, "url")?;
    let notes = wrap_field(&fields.notes, &entry_key, vault_id, entry_id, "notes")?;

    conn.execute(
        "INSERT INTO entries
            (entry_id, entry_key, title, username, password, url, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![entry_id, entry_key_column, title, username, password, url, notes, now, now],
    )?;
    Ok(())
}

/// The `entry_key` column reuses the field envelope format but is bound to
/// `column_name = "entry_key"` and encrypted under the vault key rather than
/// the entry key (spec.md §4.5).
fn encode_wrapped_entry_key_column(
    wrapped_entry_key: &WrappedEntryKey,
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
) -> Result<Vec<u8>, EntryStoreError> {
    let inner = codec::encode_canonical(wrapped_entry_key)?;
    let nonce = primitives::random_bytes::<XCHACHA_NONCE_LEN>()?;
    let aad = build_field_aad(vault_id, entry_id, ENTRY_KEY_COLUMN)?;
    let ct = primitives::aead_encrypt(vault_key.expose_secret(), &nonce, &inner, &aad)?;

    let envelope = FieldEnvelope {
        v: FIELD_ENVELOPE_VERSION,
        nonce: nonce.to_vec(),
        ct,
    };
    Ok(codec::encode_canonical(&envelope)?)
}

fn decode_wrapped_entry_key_column(
    blob: &[u8],
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
) -> Result<WrappedEntryKey, EntryStoreError> {
    let envelope: FieldEnvelope = codec::decode_strict(blob)?;
    if envelope.v != FIELD_ENVELOPE_VERSION {
        return Err(EntryStoreError::UnsupportedFieldVersion);
    }
    let nonce = primitives::nonce_from_slice(&envelope.nonce)?;
    let aad = build_field_aad(vault_id, entry_id, ENTRY_KEY_COLUMN)?;

    let inner = primitives::aead_decrypt(vault_key.expose_secret(), &nonce, &envelope.ct, &aad)
        .map_err(|_| EntryStoreError::AuthFailed)?;
    Ok(codec::decode_strict(&inner)?)
}

/// Reads one entry by id. Unwraps the entry key, then every field; any AEAD
/// failure aborts the whole read (no partial entry is returned).
pub fn read_entry(
    conn: &Connection,
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
) -> Result<EntryRecord, EntryStoreError> {
    let row: (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, i64, i64) = conn
        .query_row(
            "SELECT entry_key, title, username, password, url, notes, created_at, updated_at
             FROM entries WHERE entry_id = ?1",
            params![entry_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| EntryStoreError::NotFound(entry_id.to_string()))?;

    let (entry_key_col, title_col, username_col, password_col, url_col, notes_col, created_at, updated_at) = row;

    let wrapped_entry_key = decode_wrapped_entry_key_column(&entry_key_col, vault_key, vault_id, entry_id)?;
    let entry_key = keys::unwrap_entry_key(&wrapped_entry_key, vault_key, vault_id, entry_id)?;

    let fields = EntryFields {
        title: unwrap_field(&title_col, &entry_key, vault_id, entry_id, "title")?,
        username: unwrap_field(&username_col, &entry_key, vault_id, entry_id, "username")?,
        password: unwrap_field(&password_col, &entry_key, vault_id, entry_id, "password")?,
        url: unwrap_field(&url_col, &entry_key, vault_id, entry_id, "url")?,
        notes: unwrap_field(&notes_col, &entry_key, vault_id, entry_id, "notes")?,
    };

    Ok(EntryRecord {
        entry_id: entry_id.to_string(),
        fields,
        created_at,
        updated_at,
    })
}

/// Unwraps (not rotates) the existing entry key, re-encrypts changed fields
/// with fresh nonces, and refreshes `updated_at`.
pub fn update_entry(
    conn: &Connection,
    vault_key: &SecretBytes,
    vault_id: &str,
    entry_id: &str,
    fields: &EntryFields,
    now: i64,
) -> Result<(), EntryStoreError> {
    let entry_key_col: Vec<u8> = conn
        .query_row(
            "SELECT entry_key FROM entries WHERE entry_id = ?1",
            params![entry_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| EntryStoreError::NotFound(entry_id.to_string()))?;

    let wrapped_entry_key = decode_wrapped_entry_key_column(&entry_key_col, vault_key, vault_id, entry_id)?;
    let entry_key = keys::unwrap_entry_key(&wrapped_entry_key, vault_key, vault_id, entry_id)?;

    let title = wrap_field(&fields.title, &entry_key, vault_id, entry_id, "title")?;
    let username = wrap_field(&fields.username, &entry_key, vault_id, entry_id, "username")?;
    let password = wrap_field(&fields.password, &entry_key, vault_id, entry_id, "password")?;
    let url = wrap_field(&fields.url, &entry_key, vault_id, entry_id, "url")?;
    let notes = wrap_field(&fields.notes, &entry_key, vault_id, entry_id, "notes")?;

    conn.execute(
        "UPDATE entries SET title = ?1, username = ?2, password = ?3, url = ?4, notes = ?5, updated_at = ?6
         WHERE entry_id = ?7",
        params![title, username, password, url, notes, now, entry_id],
    )?;
    Ok(())
}

pub fn delete_entry(conn: &Connection, entry_id: &str) -> Result<(), EntryStoreError> {
    conn.execute("DELETE FROM entries WHERE entry_id = ?1", params![entry_id])?;
    Ok(())
}

/// Returns entry identifiers ordered by most recently updated first.
pub fn list_entry_ids(conn: &Connection) -> Result<Vec<String>, EntryStoreError> {
    let mut stmt = conn.prepare("SELECT entry_id FROM entries ORDER BY updated_at DESC")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::keys as vault_keys;

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn sample_fields() -> EntryFields {
        EntryFields {
            title: "example.com".to_string(),
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            url: "https://example.com".to_string(),
            notes: "work login".to_string(),
        }
    }

    #[test]
    fn create_and_read_roundtrip() {
        let conn = open_test_db();
        let vault_key = vault_keys::generate_vault_key().unwrap();

        create_entry(&conn, &vault_key, "v1", "e1", &sample_fields(), 1000).unwrap();
        let entry = read_entry(&conn, &vault_key, "v1", "e1").unwrap();

        assert_eq!(entry.fields.username, "alice");
        assert_eq!(entry.fields.password, "hunter2");
        assert_eq!(entry.created_at, 1000);
    }

    #[test]
    fn read_with_wrong_vault_key_fails() {
        let conn = open_test_db();
        let vault_key = vault_keys::generate_vault_key().unwrap();
        let wrong_key = vault_keys::generate_vault_key().unwrap();

        create_entry(&conn, &vault_key, "v1", "e1", &sample_fields(), 1000).unwrap();
        let err = read_entry(&conn, &wrong_key, "v1", "e1").unwrap_err();
        assert!(matches!(err, EntryStoreError::AuthFailed));
    }

    #[test]
    fn update_preserves_entry_key_and_refreshes_timestamp() {
        let conn = open_test_db();
        let vault_key = vault_keys::generate_vault_key().unwrap();

        create_entry(&conn, &vault_key, "v1", "e1", &sample_fields(), 1000).unwrap();
        let mut updated = sample_fields();
        updated.password = "new-password".to_string();
        update_entry(&conn, &vault_key, "v1", "e1", &updated, 2000).unwrap();

        let entry = read_entry(&conn, &vault_key, "v1", "e1").unwrap();
        assert_eq!(entry.fields.password, "new-password");
        assert_eq!(entry.created_at, 1000);
        assert_eq!(entry.updated_at, 2000);
    }

    #[test]
    fn delete_removes_row() {
        let conn = open_test_db();
        let vault_key = vault_keys::generate_vault_key().unwrap();

        create_entry(&conn, &vault_key, "v1", "e1", &sample_fields(), 1000).unwrap();
        delete_entry(&conn, "e1").unwrap();
        assert!(matches!(
            read_entry(&conn, &vault_key, "v1", "e1"),
            Err(EntryStoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_orders_by_updated_at_descending() {
        let conn = open_test_db();
        let vault_key = vault_keys::generate_vault_key().unwrap();

        create_entry(&conn, &vault_key, "v1", "e1", &sample_fields(), 1000).unwrap();
        create_entry(&conn, &vault_key, "v1", "e2", &sample_fields(), 2000).unwrap();
        update_entry(&conn, &vault_key, "v1", "e1", &sample_fields(), 3000).unwrap();

        let ids = list_entry_ids(&conn).unwrap();
        assert_eq!(ids, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn meta_set_and_get_roundtrip() {
        let conn = open_test_db();
        set_meta(&conn, "schema_version", "1").unwrap();
        assert_eq!(get_meta(&conn, "schema_version").unwrap(), Some("1".to_string()));
        assert_eq!(get_meta(&conn, "missing").unwrap(), None);
    }
}
