//! Password-derived authenticated encryption
//!
//! Every secret the vault persists is wrapped in an [`EncryptionEnvelope`]:
//!
//! - **PBKDF2-HMAC-SHA256** stretches the password with a random salt
//! - **ChaCha20-Poly1305** encrypts under a fresh 12-byte IV per call, with
//!   the envelope format version bound as associated data
//!
//! Only the salt and iteration count are stored. The derived key lives in a
//! [`DerivedKey`] that is zeroized on drop and has no serialized form.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, VaultError};

/// Envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// Size of the nonce for ChaCha20-Poly1305
pub const NONCE_LEN: usize = 12;

/// Size of a freshly generated KDF salt
pub const SALT_LEN: usize = 16;

/// Lowest iteration count accepted anywhere
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Highest iteration count accepted when reading a stored envelope
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

const AAD_DOMAIN: &[u8] = b"satchel-envelope";

/// Iteration tiers for different risk levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfTier {
    /// Wallet seed, contacts, transaction notes
    Standard,
    /// Imported private keys and other export material
    Export,
}

impl KdfTier {
    pub const fn iterations(self) -> u32 {
        match self {
            KdfTier::Standard => 100_000,
            KdfTier::Export => 600_000,
        }
    }
}

/// Symmetric key stretched from a password (zeroized on drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
    #[zeroize(skip)]
    salt: Vec<u8>,
    #[zeroize(skip)]
    iterations: u32,
}

impl DerivedKey {
    /// Stretch `password` with an existing salt
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if password.is_empty() {
            return Err(VaultError::InvalidParameter(
                "password must not be empty".to_string(),
            ));
        }
        if salt.is_empty() {
            return Err(VaultError::InvalidParameter(
                "salt must not be empty".to_string(),
            ));
        }
        if iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::InvalidParameter(format!(
                "at least {} KDF iterations are required",
                MIN_KDF_ITERATIONS
            )));
        }

        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
        Ok(Self {
            key,
            salt: salt.to_vec(),
            iterations,
        })
    }

    /// Stretch `password` with a fresh random salt
    pub fn generate(password: &str, iterations: u32) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self::derive(password, &salt, iterations)
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// Authenticated ciphertext plus everything needed to re-derive its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionEnvelope {
    /// Encrypted data (includes auth tag)
    #[serde(with = "base64_bytes_vec")]
    pub ciphertext: Vec<u8>,

    /// Nonce for ChaCha20-Poly1305
    #[serde(with = "base64_bytes_12")]
    pub iv: [u8; NONCE_LEN],

    /// KDF salt; empty when the record was sealed with a shared key
    #[serde(with = "base64_bytes_vec", default, skip_serializing_if = "Vec::is_empty")]
    pub salt: Vec<u8>,

    /// PBKDF2 iteration count
    pub iterations: u32,

    /// Envelope format version
    pub version: u32,
}

impl EncryptionEnvelope {
    /// Whether the key must come from elsewhere (the record's shared salt)
    pub fn uses_shared_key(&self) -> bool {
        self.salt.is_empty()
    }

    /// Record the salt so the envelope can be opened from a password alone
    pub fn with_salt(mut self, salt: &[u8]) -> Self {
        self.salt = salt.to_vec();
        self
    }
}

fn aad(version: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + 4);
    aad.extend_from_slice(AAD_DOMAIN);
    aad.extend_from_slice(&version.to_be_bytes());
    aad
}

/// Encrypt under an already derived key; the envelope carries no salt
pub fn encrypt_with_key(plaintext: &[u8], key: &DerivedKey) -> Result<EncryptionEnvelope> {
    if plaintext.is_empty() {
        return Err(VaultError::InvalidParameter(
            "refusing to encrypt empty plaintext".to_string(),
        ));
    }

    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);

    let aad = aad(ENVELOPE_VERSION);
    let ciphertext = key
        .cipher()
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| VaultError::EncryptionFailed)?;

    Ok(EncryptionEnvelope {
        ciphertext,
        iv,
        salt: Vec::new(),
        iterations: key.iterations(),
        version: ENVELOPE_VERSION,
    })
}

/// Encrypt with a key stretched from `password` under a fresh salt
#[instrument(skip(plaintext, password))]
pub fn encrypt_with_password(
    plaintext: &[u8],
    password: &str,
    iterations: u32,
) -> Result<EncryptionEnvelope> {
    if plaintext.is_empty() {
        return Err(VaultError::InvalidParameter(
            "refusing to encrypt empty plaintext".to_string(),
        ));
    }
    let key = DerivedKey::generate(password, iterations)?;
    let envelope = encrypt_with_key(plaintext, &key)?.with_salt(key.salt());
    debug!(len = plaintext.len(), "sealed envelope");
    Ok(envelope)
}

/// Open an envelope with an already derived key
pub fn decrypt_with_key(
    envelope: &EncryptionEnvelope,
    key: &DerivedKey,
) -> Result<Zeroizing<Vec<u8>>> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(VaultError::DecryptionFailed);
    }
    let aad = aad(envelope.version);
    key.cipher()
        .decrypt(
            Nonce::from_slice(&envelope.iv),
            Payload {
                msg: &envelope.ciphertext,
                aad: &aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| VaultError::DecryptionFailed)
}

/// Open an envelope that carries its own salt
///
/// Every failure, including a wrong password, surfaces as
/// [`VaultError::DecryptionFailed`].
#[instrument(skip_all)]
pub fn decrypt(envelope: &EncryptionEnvelope, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    if envelope.uses_shared_key()
        || !(MIN_KDF_ITERATIONS..=MAX_KDF_ITERATIONS).contains(&envelope.iterations)
    {
        return Err(VaultError::DecryptionFailed);
    }
    let key = DerivedKey::derive(password, &envelope.salt, envelope.iterations)
        .map_err(|_| VaultError::DecryptionFailed)?;
    decrypt_with_key(envelope, &key)
}

/// Decrypt under `old_password` and seal again under `new_password`
///
/// Pure: the input envelope is untouched and nothing is returned unless
/// both halves succeed.
#[instrument(skip(envelope, old_password, new_password))]
pub fn reencrypt(
    envelope: &EncryptionEnvelope,
    old_password: &str,
    new_password: &str,
    iterations: u32,
) -> Result<EncryptionEnvelope> {
    let plaintext = decrypt(envelope, old_password)?;
    encrypt_with_password(&plaintext, new_password, iterations)
}

/// Decrypt and discard; `true` if the envelope opens under `password`
pub fn verify_integrity(envelope: &EncryptionEnvelope, password: &str) -> bool {
    decrypt(envelope, password).is_ok()
}

/// [`verify_integrity`] for envelopes sealed under a shared key
pub fn verify_integrity_with_key(envelope: &EncryptionEnvelope, key: &DerivedKey) -> bool {
    decrypt_with_key(envelope, key).is_ok()
}

/// Serde helper for byte vectors as base64 strings
pub(crate) mod base64_bytes_vec {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_12 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 12], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 12], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid length"))
    }
}
