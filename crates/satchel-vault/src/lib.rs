//! Satchel Vault - password-encrypted wallet storage
//!
//! This crate owns everything the wallet persists:
//! - Encryption envelopes (PBKDF2-HMAC-SHA256 + ChaCha20-Poly1305)
//! - The versioned wallet, contacts and transaction-note records
//! - Schema 1 to schema 2 migration with a time-boxed rollback
//!
//! Storage itself is pluggable through [`KeyValueStore`]; [`FileStore`]
//! keeps one JSON file per record and [`MemoryStore`] is for tests.

pub mod config;
pub mod envelope;
pub mod error;
pub mod migration;
pub mod storage;
pub mod store;

pub use config::VaultConfig;
pub use envelope::{
    decrypt, decrypt_with_key, encrypt_with_key, encrypt_with_password, reencrypt,
    verify_integrity, verify_integrity_with_key, DerivedKey, EncryptionEnvelope, KdfTier,
};
pub use error::{Result, VaultError};
pub use migration::{MigrationBackup, MigrationReport, MigrationState, MigrationStatus};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::{
    Contact, ContactsRecord, ImportedKey, LegacyContactsRecord, LegacyTxMetadataRecord,
    NewContact, StoredContact, TxMetadataRecord, Vault, VaultSession, WalletRecord,
    WalletSettings, CONTACTS_KEY, CONTACTS_PENDING_KEY, CURRENT_SCHEMA_VERSION,
    LEGACY_SCHEMA_VERSION, MIGRATION_BACKUP_KEY, TX_METADATA_KEY, TX_METADATA_PENDING_KEY,
    WALLET_KEY,
};
