//! Error types for the Satchel core library

use thiserror::Error;

use crate::types::Network;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by key derivation, address construction, and multisig setup
///
/// Variants never carry secret input. In particular `NetworkMismatch` only
/// names the network the caller expected, not the offending string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Malformed strength, index, change flag, threshold, or path
    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[from] ParamError),

    /// Missing or malformed key, node, or extended key
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Key, WIF, xpub, or address belongs to a different network
    #[error("Network mismatch: expected {expected}")]
    NetworkMismatch { expected: Network },

    /// Cosigner count does not fit the chosen M-of-N configuration
    #[error("Configuration mismatch: expected {expected} cosigners, got {actual}")]
    ConfigMismatch { expected: usize, actual: usize },

    /// M-of-N pair outside the supported set
    #[error("Unsupported multisig configuration: {m}-of-{n}")]
    UnsupportedConfiguration { m: usize, n: usize },

    /// Threshold outside 1 <= M <= N <= 15
    #[error("Invalid threshold: {m}-of-{n}")]
    InvalidThreshold { m: usize, n: usize },

    /// Entropy is not 16, 20, 24, 28 or 32 bytes
    #[error("Invalid entropy length: {0} bytes")]
    InvalidEntropyLength(usize),

    /// Mnemonic failed word or checksum validation
    #[error("Invalid mnemonic phrase")]
    InvalidMnemonic,

    /// Address could not be decoded
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// BIP32 derivation failure (e.g. an invalid child scalar)
    #[error("Derivation error: {0}")]
    Derivation(String),
}

/// Specific reason behind an [`Error::InvalidParameter`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("mnemonic strength must be 128, 160, 192, 224 or 256 bits (got {0})")]
    MnemonicStrength(u32),

    #[error("index must not be negative (got {0})")]
    NegativeIndex(i64),

    #[error("index must be an integer")]
    NonIntegerIndex,

    #[error("index must be below 2^31 (got {0})")]
    IndexOutOfRange(u64),

    #[error("change flag must be 0 or 1 (got {0})")]
    InvalidChange(i64),

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl From<bip32::Error> for Error {
    fn from(e: bip32::Error) -> Self {
        Error::Derivation(e.to_string())
    }
}
