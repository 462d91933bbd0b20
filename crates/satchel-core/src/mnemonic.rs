//! BIP39 mnemonic phrases, entropy, and seed material
//!
//! The 2048-word dictionary is the immutable English table shipped with the
//! `bip39` crate. Nothing here keeps module-level mutable state.

use std::fmt;

use bip39::{Language, Mnemonic};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, ParamError, Result};

/// Length of a BIP39 seed in bytes
pub const SEED_LEN: usize = 64;

/// Valid entropy lengths in bytes (128..=256 bits in 32-bit steps)
pub const VALID_ENTROPY_LENGTHS: [usize; 5] = [16, 20, 24, 28, 32];

/// 64-byte wallet seed, zeroized when dropped
///
/// Only ever lives in memory while the wallet is unlocked.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SeedMaterial([u8; SEED_LEN]);

impl SeedMaterial {
    /// Wrap raw seed bytes; anything but exactly 64 bytes is rejected
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SEED_LEN {
            return Err(Error::InvalidKeyMaterial(format!(
                "seed must be {} bytes, got {}",
                SEED_LEN,
                bytes.len()
            )));
        }
        let mut seed = [0u8; SEED_LEN];
        seed.copy_from_slice(bytes);
        Ok(Self(seed))
    }

    /// Derive seed material from raw entropy via its mnemonic encoding
    pub fn from_entropy(entropy: &[u8], passphrase: &str) -> Result<Self> {
        let phrase = entropy_to_mnemonic(entropy)?;
        mnemonic_to_seed(&phrase, passphrase)
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }
}

impl fmt::Debug for SeedMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeedMaterial([REDACTED])")
    }
}

/// Generate a fresh mnemonic phrase from OS entropy
///
/// `strength_bits` must be one of 128, 160, 192, 224 or 256.
#[instrument]
pub fn generate_mnemonic(strength_bits: u32) -> Result<Zeroizing<String>> {
    if !matches!(strength_bits, 128 | 160 | 192 | 224 | 256) {
        return Err(ParamError::MnemonicStrength(strength_bits).into());
    }

    let len = (strength_bits / 8) as usize;
    let mut entropy = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut entropy[..len]);

    let phrase = entropy_to_mnemonic(&entropy[..len])?;
    debug!(words = phrase.split(' ').count(), "generated mnemonic");
    Ok(phrase)
}

/// Check a phrase against the wordlist and checksum
///
/// Internal whitespace is normalized first. Malformed input yields `false`.
pub fn validate_mnemonic(phrase: &str) -> bool {
    parse(phrase).is_ok()
}

/// Derive the 64-byte BIP39 seed; an empty passphrase is valid
#[instrument(skip_all)]
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<SeedMaterial> {
    let mnemonic = parse(phrase)?;
    let mut seed = mnemonic.to_seed(passphrase);
    let material = SeedMaterial::from_bytes(&seed);
    seed.zeroize();
    material
}

/// Encode entropy as a mnemonic phrase
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<Zeroizing<String>> {
    if !VALID_ENTROPY_LENGTHS.contains(&entropy.len()) {
        return Err(Error::InvalidEntropyLength(entropy.len()));
    }
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|_| Error::InvalidEntropyLength(entropy.len()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Decode a mnemonic phrase back into its entropy
pub fn mnemonic_to_entropy(phrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let mnemonic = parse(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_entropy()))
}

fn parse(phrase: &str) -> Result<Mnemonic> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    if normalized.is_empty() {
        return Err(Error::InvalidMnemonic);
    }
    Mnemonic::parse_in(Language::English, normalized.as_str()).map_err(|_| Error::InvalidMnemonic)
}
