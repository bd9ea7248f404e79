pub mod codec;
pub mod entry_store;
pub mod envelope;
pub mod header;
pub mod io;
pub mod keys;
pub mod lifecycle;
pub mod primitives;

pub use entry_store::{EntryFields, EntryRecord, EntryStoreError};
pub use envelope::{DecryptedPayload, EncryptedEnvelope, EnvelopeError, IntegrityBlock, SqlitePayload, VaultMetadata};
pub use header::{CryptoParams, HeaderError, KdfParams, VaultHeader};
pub use keys::{KeyError, WrappedEntryKey, WrappedVaultKey};
pub use lifecycle::{LifecycleError, NewVaultParams, OpenContext, Vault, VaultState};
pub use primitives::{Argon2Params, CryptoError, SecretBytes};
