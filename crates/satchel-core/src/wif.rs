//! Wallet Import Format encoding for single private keys

use std::fmt;

use k256::SecretKey;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::PublicKey;
use crate::error::{Error, Result};
use crate::types::Network;

/// Marker byte appended to the payload for compressed public keys
const COMPRESSED_FLAG: u8 = 0x01;

/// A private key recovered from a WIF string
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DecodedWif {
    private_key: [u8; 32],
    #[zeroize(skip)]
    pub compressed: bool,
    #[zeroize(skip)]
    pub network: Network,
}

impl DecodedWif {
    /// Raw 32-byte private key
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// Compressed public key for the decoded scalar
    pub fn public_key(&self) -> Result<PublicKey> {
        let secret = secret_key(&self.private_key)?;
        Ok(PublicKey::from_k256(&secret.public_key()))
    }
}

impl fmt::Debug for DecodedWif {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedWif")
            .field("private_key", &"[REDACTED]")
            .field("compressed", &self.compressed)
            .field("network", &self.network)
            .finish()
    }
}

/// Encode a private key as WIF
pub fn private_key_to_wif(
    private_key: &[u8; 32],
    network: Network,
    compressed: bool,
) -> Result<Zeroizing<String>> {
    secret_key(private_key)?;

    let mut payload = Zeroizing::new(Vec::with_capacity(34));
    payload.push(network.wif_prefix());
    payload.extend_from_slice(private_key);
    if compressed {
        payload.push(COMPRESSED_FLAG);
    }

    Ok(Zeroizing::new(
        bs58::encode(payload.as_slice()).with_check().into_string(),
    ))
}

/// Decode a WIF string, requiring it to belong to `expected`
///
/// Errors never include the input string.
pub fn decode_wif(wif: &str, expected: Network) -> Result<DecodedWif> {
    let payload = Zeroizing::new(
        bs58::decode(wif.trim())
            .with_check(None)
            .into_vec()
            .map_err(|_| Error::InvalidKeyMaterial("WIF checksum or encoding invalid".to_string()))?,
    );

    let compressed = match payload.len() {
        33 => false,
        34 if payload[33] == COMPRESSED_FLAG => true,
        34 => {
            return Err(Error::InvalidKeyMaterial(
                "WIF compression flag invalid".to_string(),
            ))
        }
        _ => {
            return Err(Error::InvalidKeyMaterial(
                "WIF payload has wrong length".to_string(),
            ))
        }
    };

    match Network::from_wif_prefix(payload[0]) {
        Some(network) if network == expected => {}
        Some(_) => return Err(Error::NetworkMismatch { expected }),
        None => {
            return Err(Error::InvalidKeyMaterial(
                "WIF version byte not recognised".to_string(),
            ))
        }
    }

    let mut private_key = [0u8; 32];
    private_key.copy_from_slice(&payload[1..33]);
    let decoded = DecodedWif {
        private_key,
        compressed,
        network: expected,
    };
    private_key.zeroize();

    secret_key(decoded.private_key())?;
    Ok(decoded)
}

fn secret_key(bytes: &[u8; 32]) -> Result<SecretKey> {
    SecretKey::from_slice(bytes)
        .map_err(|_| Error::InvalidKeyMaterial("private key out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_one() -> [u8; 32] {
        let mut k = [0u8; 32];
        k[31] = 1;
        k
    }

    #[test]
    fn test_known_mainnet_wif() {
        let wif = private_key_to_wif(&key_one(), Network::Mainnet, true).unwrap();
        assert_eq!(
            wif.as_str(),
            "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn"
        );
        let uncompressed = private_key_to_wif(&key_one(), Network::Mainnet, false).unwrap();
        assert_eq!(
            uncompressed.as_str(),
            "5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf"
        );
    }

    #[test]
    fn test_padded_wif_reencodes_trimmed() {
        let wif = private_key_to_wif(&key_one(), Network::Mainnet, true).unwrap();
        let padded = format!("  {}\n", wif.as_str());
        let decoded = decode_wif(&padded, Network::Mainnet).unwrap();
        let encoded =
            private_key_to_wif(decoded.private_key(), Network::Mainnet, decoded.compressed)
                .unwrap();
        assert_eq!(encoded.as_str(), padded.trim());
    }

    #[test]
    fn test_round_trip_testnet() {
        let key = [0x42u8; 32];
        let wif = private_key_to_wif(&key, Network::Testnet, true).unwrap();
        assert!(wif.starts_with('c'));
        let decoded = decode_wif(&wif, Network::Testnet).unwrap();
        assert_eq!(decoded.private_key(), &key);
        assert!(decoded.compressed);
    }

    #[test]
    fn test_testnet_wif_on_mainnet_is_mismatch() {
        let wif = private_key_to_wif(&[0x42u8; 32], Network::Testnet, true).unwrap();
        let err = decode_wif(&wif, Network::Mainnet).unwrap_err();
        assert_eq!(
            err,
            Error::NetworkMismatch {
                expected: Network::Mainnet
            }
        );
        assert!(!err.to_string().contains(wif.as_str()));
    }

    #[test]
    fn test_zero_key_rejected() {
        assert!(private_key_to_wif(&[0u8; 32], Network::Mainnet, true).is_err());
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let wif = private_key_to_wif(&key_one(), Network::Mainnet, true).unwrap();
        let mut corrupted = wif.to_string();
        corrupted.pop();
        corrupted.push('o');
        assert!(matches!(
            decode_wif(&corrupted, Network::Mainnet),
            Err(Error::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_public_key_of_decoded() {
        let wif = private_key_to_wif(&key_one(), Network::Mainnet, true).unwrap();
        let decoded = decode_wif(&wif, Network::Mainnet).unwrap();
        assert_eq!(
            decoded.public_key().unwrap().to_hex(),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }
}
