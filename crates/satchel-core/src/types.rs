//! Network parameters and small shared newtypes

use std::fmt;
use std::str::FromStr;

use bech32::Hrp;
use bip32::Prefix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ParamError, Result};

/// Bitcoin network a key, address, or extended key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network
    Mainnet,
    /// Test network
    Testnet,
}

impl Network {
    /// BIP44 coin type (applied hardened)
    pub const fn coin_type(self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet => 1,
        }
    }

    /// WIF version byte
    pub const fn wif_prefix(self) -> u8 {
        match self {
            Network::Mainnet => 0x80,
            Network::Testnet => 0xef,
        }
    }

    /// Base58Check version byte for pay-to-pubkey-hash
    pub const fn p2pkh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    /// Base58Check version byte for pay-to-script-hash
    pub const fn p2sh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet => 0xc4,
        }
    }

    /// Bech32 human readable part for segwit addresses
    pub fn hrp(self) -> Hrp {
        match self {
            Network::Mainnet => bech32::hrp::BC,
            Network::Testnet => bech32::hrp::TB,
        }
    }

    /// Extended public key prefix (xpub / tpub)
    pub fn xpub_prefix(self) -> Prefix {
        match self {
            Network::Mainnet => Prefix::XPUB,
            Network::Testnet => Prefix::TPUB,
        }
    }

    /// Extended private key prefix (xprv / tprv)
    pub fn xprv_prefix(self) -> Prefix {
        match self {
            Network::Mainnet => Prefix::XPRV,
            Network::Testnet => Prefix::TPRV,
        }
    }

    /// Identify the network of an extended key from its prefix
    pub fn from_extended_prefix(prefix: Prefix) -> Option<(Network, bool)> {
        if prefix == Prefix::XPUB {
            Some((Network::Mainnet, true))
        } else if prefix == Prefix::TPUB {
            Some((Network::Testnet, true))
        } else if prefix == Prefix::XPRV {
            Some((Network::Mainnet, false))
        } else if prefix == Prefix::TPRV {
            Some((Network::Testnet, false))
        } else {
            None
        }
    }

    /// Identify the network of a WIF version byte
    pub fn from_wif_prefix(byte: u8) -> Option<Network> {
        match byte {
            0x80 => Some(Network::Mainnet),
            0xef => Some(Network::Testnet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(ParamError::Other(format!("unknown network '{}'", other)).into()),
        }
    }
}

/// BIP32 key fingerprint (first 4 bytes of hash160 of a public key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(#[serde(with = "hex_bytes_4")] pub [u8; 4]);

impl Fingerprint {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Lowercase 8-character hex form used in xpub exports and descriptors
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| {
            Error::InvalidKeyMaterial("fingerprint must be 8 hex characters".to_string())
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Serde helper for 4-byte arrays as hex strings
pub mod hex_bytes_4 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 4], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 4], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for 33-byte arrays as hex strings
pub mod hex_bytes_33 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 33], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 33];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}
