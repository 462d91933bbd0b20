//! Error types for the Satchel vault

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur in vault operations
///
/// `DecryptionFailed` is deliberately undifferentiated: a wrong password, a
/// corrupted ciphertext, a corrupted IV and a tampered tag all look the same.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] satchel_core::Error),

    /// Malformed caller input, rejected before any cryptography runs
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any failure on the decrypt path
    #[error("Incorrect password or corrupted data")]
    DecryptionFailed,

    /// The AEAD refused to seal a payload
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Session key no longer matches the stored wallet (password changed or
    /// a different wallet); unlock again
    #[error("Session expired; unlock the wallet again")]
    SessionExpired,

    /// Migration aborted; `rolled_back` tells whether the backup was restored
    #[error("Migration failed: {reason} (rolled back: {rolled_back})")]
    MigrationFailed { reason: String, rolled_back: bool },

    /// Rollback requested but no backup exists
    #[error("no backup found")]
    NoBackup,

    /// Backup is older than the configured rollback window
    #[error("Migration backup expired {days} days ago")]
    BackupExpired { days: i64 },

    /// No wallet has been created in this store
    #[error("Wallet not found")]
    WalletNotFound,

    /// A wallet already exists in this store
    #[error("Wallet already exists")]
    WalletExists,

    /// Record schema version this build cannot handle
    #[error("Unsupported schema version: {0}")]
    UnsupportedVersion(u32),

    /// Referenced account, contact, or key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}
