//! Hash and public key primitives shared by the derivation and address layers

use std::fmt;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::hex_bytes_33;

/// Compressed secp256k1 public key (33 bytes), validated as a curve point
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_bytes_33")] [u8; 33]);

impl PublicKey {
    /// Parse a compressed SEC1 public key
    ///
    /// Only the 33-byte `0x02`/`0x03` form is accepted. An empty slice is the
    /// "missing key" case and is rejected like any other malformed input.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidKeyMaterial("public key is missing".to_string()));
        }
        if bytes.len() != 33 || !matches!(bytes[0], 0x02 | 0x03) {
            return Err(Error::InvalidKeyMaterial(
                "public key must be 33-byte compressed SEC1".to_string(),
            ));
        }
        let point = k256::PublicKey::from_sec1_bytes(bytes)
            .map_err(|_| Error::InvalidKeyMaterial("not a valid secp256k1 point".to_string()))?;
        Ok(Self::from_k256(&point))
    }

    /// Parse a hex-encoded SEC1 public key
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| Error::InvalidKeyMaterial("public key is not valid hex".to_string()))?;
        Self::from_slice(&bytes)
    }

    pub(crate) fn from_k256(point: &k256::PublicKey) -> Self {
        let encoded = point.to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(encoded.as_bytes());
        Self(bytes)
    }

    /// Compressed SEC1 bytes
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// hash160 of the compressed key
    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.0)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Hash data using SHA256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(sha256(data));
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // secp256k1 generator point
    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn test_hash160_of_generator() {
        let pk = PublicKey::from_hex(G).unwrap();
        assert_eq!(
            hex::encode(pk.hash160()),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(matches!(
            PublicKey::from_slice(&[]),
            Err(Error::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_off_curve_key_rejected() {
        let mut bytes = [0u8; 33];
        bytes[0] = 0x02;
        bytes[1..].copy_from_slice(&[0xff; 32]);
        assert!(PublicKey::from_slice(&bytes).is_err());
    }

    #[test]
    fn test_uncompressed_key_rejected() {
        let uncompressed = hex::decode(
            "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
             483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
        )
        .unwrap();
        assert!(matches!(
            PublicKey::from_slice(&uncompressed),
            Err(Error::InvalidKeyMaterial(_))
        ));
        // Hybrid encodings carry a valid point but are still not compressed
        let mut hybrid = uncompressed.clone();
        hybrid[0] = 0x06;
        assert!(PublicKey::from_slice(&hybrid).is_err());
    }
}
