use passworder_core::vault::header::{HEADER_KDF_MIN_MEMORY_KIB, KDF_ALGO, KdfParams};
use passworder_core::vault::keys::{MASTER_KEY_LEN, MASTER_KEY_MIN_ITERATIONS, MASTER_KEY_MIN_MEMORY_KIB, MASTER_KEY_MIN_PARALLELISM};
use passworder_core::vault::lifecycle::LifecycleError;
use passworder_core::vault::primitives::Argon2Params;
use passworder_core::vault::{EntryFields, NewVaultParams, OpenContext, Vault, VaultState};
use std::fs;
use std::io::Write;

fn argon2_params() -> Argon2Params {
    Argon2Params {
        memory_kib: MASTER_KEY_MIN_MEMORY_KIB,
        iterations: MASTER_KEY_MIN_ITERATIONS,
        parallelism: MASTER_KEY_MIN_PARALLELISM,
        output_len: MASTER_KEY_LEN,
    }
}

fn new_vault_params(vault_id: &str) -> NewVaultParams {
    NewVaultParams {
        vault_id: vault_id.to_string(),
        device_id: "integration-test-device".to_string(),
        kdf: KdfParams {
            algo: KDF_ALGO.to_string(),
            salt: vec![7u8; 16],
            memory: HEADER_KDF_MIN_MEMORY_KIB,
            iterations: 1,
            parallelism: 1,
        },
    }
}

/// End-to-end create, write an entry, commit, reopen, read it back.
#[test]
fn create_write_commit_reopen_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");

    Vault::create(&vault_path, b"correct horse battery staple", new_vault_params("vault-a"), argon2_params(), 1_700_000_000).unwrap();

    let ctx = OpenContext {
        expected_vault_id: Some("vault-a".to_string()),
        last_seen_vault_version: 0,
        last_seen_key_epoch: 0,
    };
    let mut vault = Vault::open(
        &vault_path,
        b"correct horse battery staple",
        &ctx,
        argon2_params(),
        1_700_000_100,
    )
    .unwrap();
    assert_eq!(vault.state(), VaultState::Open);

    vault
        .create_entry(
            "entry-1",
            &EntryFields {
                title: "example.com".to_string(),
                username: "alice".to_string(),
                password: "hunter2".to_string(),
                url: "https://example.com".to_string(),
                notes: String::new(),
            },
            1_700_000_100,
        )
        .unwrap();
    assert_eq!(vault.state(), VaultState::Dirty);

    vault.commit("integration-test-device", 1_700_000_200).unwrap();
    assert_eq!(vault.state(), VaultState::Clean);
    assert_eq!(vault.vault_version(), 2);

    vault.close().unwrap();

    let ctx = OpenContext {
        expected_vault_id: Some("vault-a".to_string()),
        last_seen_vault_version: 2,
        last_seen_key_epoch: 1,
    };
    let reopened = Vault::open(&vault_path, b"correct horse battery staple", &ctx, argon2_params(), 1_700_000_300).unwrap();
    let record = reopened.read_entry("entry-1").unwrap();
    assert_eq!(record.fields.username, "alice");
    assert_eq!(record.fields.password, "hunter2");
    assert_eq!(reopened.list_entry_ids().unwrap(), vec!["entry-1".to_string()]);
    reopened.close().unwrap();
}

/// spec.md §8 scenario 8: a failure between temp-file write and rename must
/// leave the destination file exactly as it was, with no temp file left
/// behind. `write_vault_bytes_atomic` itself cannot be interrupted from
/// outside, so this test exercises the equivalent guarantee at the
/// `tempfile::NamedTempFile` layer it is built on: an unpersisted temp file
/// never touches the destination and cleans itself up on drop.
#[test]
fn interrupted_write_leaves_destination_and_directory_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");

    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-b"), argon2_params(), 1_700_000_000).unwrap();
    let original_bytes = fs::read(&vault_path).unwrap();

    {
        let mut tmp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        tmp.write_all(b"partial write that never gets persisted").unwrap();
        // tmp is dropped here without calling persist(), simulating a crash
        // between the temp-file write and the atomic rename.
    }

    let bytes_after = fs::read(&vault_path).unwrap();
    assert_eq!(bytes_after, original_bytes);

    let leftover_temp_files: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path() != vault_path && !e.path().to_string_lossy().ends_with(".lock"))
        .collect();
    assert!(leftover_temp_files.is_empty(), "unpersisted temp file was not cleaned up");
}

#[test]
fn wrong_password_on_reopen_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");

    Vault::create(&vault_path, b"correct horse battery staple", new_vault_params("vault-c"), argon2_params(), 1_700_000_000).unwrap();

    let ctx = OpenContext::default();
    let err = Vault::open(&vault_path, b"wrong password", &ctx, argon2_params(), 1_700_000_100).unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn update_and_delete_entry_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");

    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-d"), argon2_params(), 1_700_000_000).unwrap();
    let ctx = OpenContext::default();
    let mut vault = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_100).unwrap();

    let fields = EntryFields {
        title: "bank".to_string(),
        username: "bob".to_string(),
        password: "initial".to_string(),
        url: String::new(),
        notes: String::new(),
    };
    vault.create_entry("entry-1", &fields, 1_700_000_100).unwrap();

    let updated = EntryFields {
        password: "rotated".to_string(),
        ..fields
    };
    vault.update_entry("entry-1", &updated, 1_700_000_200).unwrap();
    assert_eq!(vault.read_entry("entry-1").unwrap().fields.password, "rotated");

    vault.delete_entry("entry-1").unwrap();
    assert!(vault.list_entry_ids().unwrap().is_empty());

    vault.close().unwrap();
}

/// Mirrors the crate-internal `VaultFile { header, envelope }` layout for
/// test fixtures: canonical CBOR is sorted by map key, so decoding into this
/// independently-defined struct round-trips the same on-disk bytes.
#[derive(serde::Serialize, serde::Deserialize)]
struct RawVaultFile {
    header: passworder_core::vault::header::VaultHeader,
    envelope: passworder_core::vault::envelope::EncryptedEnvelope,
}

/// spec.md §8 scenario: a header corrupted on disk (`vault_id`, here) must
/// never be silently accepted. `vault_id` feeds the vault-key-wrap AAD, so a
/// tampered byte desynchronizes it from the AAD used at encryption time and
/// `Vault::open` fails.
#[test]
fn header_tamper_never_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");
    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-e"), argon2_params(), 1_700_000_000).unwrap();

    let mut bytes = fs::read(&vault_path).unwrap();
    let needle = b"vault-e";
    let pos = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("vault_id bytes present in encoded header");
    // Flip the case bit of the trailing letter: still a valid, single
    // ASCII byte, so the corruption stays confined to the vault_id field
    // rather than producing a malformed CBOR item.
    bytes[pos + needle.len() - 1] ^= 0x20;
    fs::write(&vault_path, &bytes).unwrap();

    let ctx = OpenContext::default();
    let err = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_100).unwrap_err();
    assert!(!err.to_string().is_empty());
}

/// spec.md §8 scenario: reverting a vault file to an earlier, genuinely
/// valid `vault_version` must be detected and rejected by a client that has
/// already seen the newer version.
#[test]
fn rollback_to_earlier_valid_version_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");
    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-f"), argon2_params(), 1_700_000_000).unwrap();

    let ctx = OpenContext::default();
    let mut vault = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_100).unwrap();
    let fields = EntryFields {
        title: "first".to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
        url: String::new(),
        notes: String::new(),
    };
    vault.create_entry("entry-1", &fields, 1_700_000_100).unwrap();
    vault.commit("device", 1_700_000_200).unwrap();
    assert_eq!(vault.vault_version(), 2);
    let version_2_bytes = fs::read(&vault_path).unwrap();

    vault.update_entry("entry-1", &fields, 1_700_000_300).unwrap();
    vault.commit("device", 1_700_000_400).unwrap();
    assert_eq!(vault.vault_version(), 3);
    vault.close().unwrap();

    // Simulate an attacker restoring an older, still-validly-signed copy.
    fs::write(&vault_path, &version_2_bytes).unwrap();

    let ctx = OpenContext {
        expected_vault_id: Some("vault-f".to_string()),
        last_seen_vault_version: 3,
        last_seen_key_epoch: 1,
    };
    let err = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_500).unwrap_err();
    assert!(matches!(err, LifecycleError::VaultVersionRollback));
}

/// spec.md's supplemented rotate-key feature: rotate, commit, close, then
/// reopen with an `OpenContext` carrying the new epoch.
#[test]
fn rotate_key_then_reopen_with_new_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");
    Vault::create(&vault_path, b"old-password", new_vault_params("vault-g"), argon2_params(), 1_700_000_000).unwrap();

    let ctx = OpenContext::default();
    let mut vault = Vault::open(&vault_path, b"old-password", &ctx, argon2_params(), 1_700_000_100).unwrap();
    assert_eq!(vault.key_epoch(), 1);

    vault.rotate_key(b"new-password", argon2_params()).unwrap();
    assert_eq!(vault.key_epoch(), 2);
    vault.mark_dirty().unwrap();
    vault.commit("device", 1_700_000_200).unwrap();
    vault.close().unwrap();

    // The old password must no longer work.
    let ctx = OpenContext::default();
    assert!(Vault::open(&vault_path, b"old-password", &ctx, argon2_params(), 1_700_000_300).is_err());

    // Reopening with the new password and the new epoch recorded locally
    // must succeed.
    let ctx = OpenContext {
        expected_vault_id: Some("vault-g".to_string()),
        last_seen_vault_version: 2,
        last_seen_key_epoch: 2,
    };
    let reopened = Vault::open(&vault_path, b"new-password", &ctx, argon2_params(), 1_700_000_300).unwrap();
    assert_eq!(reopened.key_epoch(), 2);
    reopened.close().unwrap();
}

/// Reverting to a pre-rotation file (valid at the time, now an older
/// epoch) must be detected by a client that already observed the rotation.
#[test]
fn key_epoch_downgrade_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");
    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-h"), argon2_params(), 1_700_000_000).unwrap();
    let pre_rotation_bytes = fs::read(&vault_path).unwrap();

    let ctx = OpenContext::default();
    let mut vault = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_100).unwrap();
    vault.rotate_key(b"hunter2", argon2_params()).unwrap();
    vault.mark_dirty().unwrap();
    vault.commit("device", 1_700_000_200).unwrap();
    assert_eq!(vault.key_epoch(), 2);
    vault.close().unwrap();

    // Simulate an attacker restoring the pre-rotation file.
    fs::write(&vault_path, &pre_rotation_bytes).unwrap();

    let ctx = OpenContext {
        expected_vault_id: Some("vault-h".to_string()),
        last_seen_vault_version: 1,
        last_seen_key_epoch: 2,
    };
    let err = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_300).unwrap_err();
    assert!(matches!(err, LifecycleError::KeyEpochRollback));
}

/// spec.md §8 scenario: the embedded database's integrity hash must match
/// its actual bytes. Builds a tampered envelope with the genuine vault key
/// (derived the same way `Vault::open` derives it) and writes it back, then
/// asserts `Vault::open` rejects it.
#[test]
fn integrity_hash_mismatch_is_rejected() {
    use passworder_core::vault::envelope::{self, DecryptedPayload};
    use passworder_core::vault::keys;

    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");
    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-i"), argon2_params(), 1_700_000_000).unwrap();

    let bytes = fs::read(&vault_path).unwrap();
    let file: RawVaultFile = passworder_core::vault::codec::decode_strict(&bytes).unwrap();

    let master_key = keys::derive_master_key(b"hunter2", &file.header.kdf.salt, argon2_params()).unwrap();
    let kek = keys::derive_kek(&master_key).unwrap();
    let vault_key = keys::unwrap_vault_key(
        &file.envelope.wrapped_vault_key,
        &kek,
        &file.header.vault_id,
        file.header.key_epoch,
    )
    .unwrap();
    let header_aad = file.header.canonical_bytes(1_700_000_000).unwrap();

    let envelope_bytes = file.envelope.encode_canonical().unwrap();
    let (mut payload, wrapped_vault_key): (DecryptedPayload, _) =
        envelope::decrypt_payload(&envelope_bytes, &vault_key, &header_aad).unwrap();
    payload.vault_metadata.integrity.payload_hash = vec![0xAA; 32];

    let tampered_envelope = envelope::encrypt_payload(&payload, &vault_key, &header_aad, wrapped_vault_key).unwrap();
    let tampered_file = RawVaultFile {
        header: file.header,
        envelope: tampered_envelope,
    };
    let tampered_bytes = passworder_core::vault::codec::encode_canonical(&tampered_file).unwrap();
    passworder_core::vault::io::write_vault_bytes_atomic(&vault_path, &tampered_bytes).unwrap();

    let ctx = OpenContext::default();
    let err = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_100).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Envelope(passworder_core::vault::envelope::EnvelopeError::IntegrityMismatch)
    ));
}

/// spec.md §8 scenario: a field's AEAD is bound to its owning entry's id.
/// Swapping a ciphertext column between two entries must fail to decrypt
/// under the receiving entry's AAD, exercised end-to-end through
/// `Vault::read_entry`.
#[test]
fn field_aad_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.pwder");
    Vault::create(&vault_path, b"hunter2", new_vault_params("vault-j"), argon2_params(), 1_700_000_000).unwrap();

    let ctx = OpenContext::default();
    let mut vault = Vault::open(&vault_path, b"hunter2", &ctx, argon2_params(), 1_700_000_100).unwrap();

    vault
        .create_entry(
            "entry-1",
            &EntryFields {
                title: "a".to_string(),
                username: "u1".to_string(),
                password: "p1".to_string(),
                url: String::new(),
                notes: String::new(),
            },
            1_700_000_100,
        )
        .unwrap();
    vault
        .create_entry(
            "entry-2",
            &EntryFields {
                title: "b".to_string(),
                username: "u2".to_string(),
                password: "p2".to_string(),
                url: String::new(),
                notes: String::new(),
            },
            1_700_000_100,
        )
        .unwrap();

    let entry_2_password: Vec<u8> = vault
        .connection()
        .query_row("SELECT password FROM entries WHERE entry_id = 'entry-2'", [], |row| row.get(0))
        .unwrap();
    vault
        .connection()
        .execute(
            "UPDATE entries SET password = ?1 WHERE entry_id = 'entry-1'",
            rusqlite::params![entry_2_password],
        )
        .unwrap();

    let err = vault.read_entry("entry-1").unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::EntryStore(passworder_core::vault::entry_store::EntryStoreError::AuthFailed)
    ));
}
