//! Bitcoin script construction
//!
//! Covers the output scripts for every supported address type and the bare
//! `OP_M <keys> OP_N OP_CHECKMULTISIG` script used as both P2SH redeem script
//! and P2WSH witness script.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{hash160, sha256, PublicKey};
use crate::error::{Error, Result};

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// Maximum keys in a standard bare multisig script
pub const MAX_MULTISIG_KEYS: usize = 15;

/// Raw script bytes
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script(#[serde(with = "hex_vec")] Vec<u8>);

impl Script {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// hash160 of the script, the P2SH commitment
    pub fn script_hash(&self) -> [u8; 20] {
        hash160(&self.0)
    }

    /// sha256 of the script, the P2WSH witness program
    pub fn witness_script_hash(&self) -> [u8; 32] {
        sha256(&self.0)
    }

    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        let mut s = Vec::with_capacity(25);
        s.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
        s.extend_from_slice(pubkey_hash);
        s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(s)
    }

    /// `OP_HASH160 <20> OP_EQUAL`
    pub fn p2sh(script_hash: &[u8; 20]) -> Self {
        let mut s = Vec::with_capacity(23);
        s.extend_from_slice(&[OP_HASH160, 20]);
        s.extend_from_slice(script_hash);
        s.push(OP_EQUAL);
        Self(s)
    }

    /// `OP_0 <20>`
    pub fn p2wpkh(pubkey_hash: &[u8; 20]) -> Self {
        let mut s = Vec::with_capacity(22);
        s.extend_from_slice(&[OP_0, 20]);
        s.extend_from_slice(pubkey_hash);
        Self(s)
    }

    /// `OP_0 <32>`
    pub fn p2wsh(script_hash: &[u8; 32]) -> Self {
        let mut s = Vec::with_capacity(34);
        s.extend_from_slice(&[OP_0, 32]);
        s.extend_from_slice(script_hash);
        Self(s)
    }

    /// BIP67 sorted multisig script `OP_M <keys> OP_N OP_CHECKMULTISIG`
    ///
    /// The threshold is checked before any bytes are produced. Keys are
    /// sorted by their compressed encoding so every cosigner builds the same
    /// script regardless of the order keys were exchanged in.
    pub fn sorted_multisig(threshold: usize, keys: &[PublicKey]) -> Result<Self> {
        validate_threshold(threshold, keys.len())?;
        let sorted = sort_public_keys(keys)?;

        let mut s = Vec::with_capacity(3 + sorted.len() * 34);
        s.push(small_int_opcode(threshold));
        for key in &sorted {
            s.push(33);
            s.extend_from_slice(key.as_bytes());
        }
        s.push(small_int_opcode(sorted.len()));
        s.push(OP_CHECKMULTISIG);
        Ok(Self(s))
    }

    /// Parse a script produced by [`Script::sorted_multisig`]
    pub fn parse_multisig(&self) -> Option<(usize, Vec<PublicKey>)> {
        let bytes = &self.0;
        let (&last, rest) = bytes.split_last()?;
        if last != OP_CHECKMULTISIG || rest.len() < 2 {
            return None;
        }
        let m = opcode_small_int(rest[0])?;
        let n = opcode_small_int(*rest.last()?)?;
        let body = &rest[1..rest.len() - 1];
        if body.len() != n * 34 {
            return None;
        }
        let keys = body
            .chunks(34)
            .map(|chunk| (chunk[0] == 33).then(|| PublicKey::from_slice(&chunk[1..]).ok()).flatten())
            .collect::<Option<Vec<_>>>()?;
        Some((m, keys))
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

/// Check `1 <= m <= n <= 15`
pub fn validate_threshold(m: usize, n: usize) -> Result<()> {
    if m == 0 || n == 0 || m > n || n > MAX_MULTISIG_KEYS {
        return Err(Error::InvalidThreshold { m, n });
    }
    Ok(())
}

/// Sort keys lexicographically by compressed encoding (BIP67)
///
/// Duplicate keys are rejected: a repeated key would silently lower the
/// effective number of independent signers.
pub fn sort_public_keys(keys: &[PublicKey]) -> Result<Vec<PublicKey>> {
    let mut sorted = keys.to_vec();
    sorted.sort();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::InvalidKeyMaterial(
            "duplicate public key in multisig set".to_string(),
        ));
    }
    Ok(sorted)
}

fn small_int_opcode(n: usize) -> u8 {
    debug_assert!((1..=16).contains(&n));
    OP_1 + (n as u8 - 1)
}

fn opcode_small_int(op: u8) -> Option<usize> {
    (OP_1..=OP_1 + 15)
        .contains(&op)
        .then(|| (op - OP_1) as usize + 1)
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP67 test vector 1
    const KEY_A: &str = "02ff12471208c14bd580709cb2358d98975247d8765f92bc25eab3b2763ed605f8";
    const KEY_B: &str = "02fe6f0a5a297eb38c391581c4413e084773ea23954d93f7753db7dc0adc188b2f";

    #[test]
    fn test_bip67_vector_script() {
        let keys = [
            PublicKey::from_hex(KEY_A).unwrap(),
            PublicKey::from_hex(KEY_B).unwrap(),
        ];
        let script = Script::sorted_multisig(2, &keys).unwrap();
        assert_eq!(
            script.to_hex(),
            format!("5221{}21{}52ae", KEY_B, KEY_A)
        );
    }

    #[test]
    fn test_order_independence() {
        let a = PublicKey::from_hex(KEY_A).unwrap();
        let b = PublicKey::from_hex(KEY_B).unwrap();
        assert_eq!(
            Script::sorted_multisig(1, &[a, b]).unwrap(),
            Script::sorted_multisig(1, &[b, a]).unwrap()
        );
    }

    #[test]
    fn test_threshold_validation() {
        let a = PublicKey::from_hex(KEY_A).unwrap();
        assert_eq!(
            Script::sorted_multisig(0, &[a]).unwrap_err(),
            Error::InvalidThreshold { m: 0, n: 1 }
        );
        assert_eq!(
            Script::sorted_multisig(2, &[a]).unwrap_err(),
            Error::InvalidThreshold { m: 2, n: 1 }
        );
        assert!(validate_threshold(15, 15).is_ok());
        assert!(validate_threshold(2, 16).is_err());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let a = PublicKey::from_hex(KEY_A).unwrap();
        assert!(matches!(
            Script::sorted_multisig(1, &[a, a]),
            Err(Error::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_sorted_multisig_rejects_uncompressed_key() {
        let uncompressed = hex::decode(
            "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
             483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
        )
        .unwrap();
        let built = [hex::decode(KEY_A).unwrap(), uncompressed]
            .iter()
            .map(|bytes| PublicKey::from_slice(bytes))
            .collect::<Result<Vec<_>>>()
            .and_then(|keys| Script::sorted_multisig(2, &keys));
        assert!(matches!(built, Err(Error::InvalidKeyMaterial(_))));
    }

    #[test]
    fn test_parse_multisig() {
        let keys = [
            PublicKey::from_hex(KEY_A).unwrap(),
            PublicKey::from_hex(KEY_B).unwrap(),
        ];
        let script = Script::sorted_multisig(1, &keys).unwrap();
        let (m, parsed) = script.parse_multisig().unwrap();
        assert_eq!(m, 1);
        assert_eq!(parsed, sort_public_keys(&keys).unwrap());
        assert!(Script::p2wpkh(&[0u8; 20]).parse_multisig().is_none());
    }

    #[test]
    fn test_output_script_shapes() {
        assert_eq!(Script::p2pkh(&[0u8; 20]).len(), 25);
        assert_eq!(Script::p2sh(&[0u8; 20]).len(), 23);
        assert_eq!(Script::p2wpkh(&[0u8; 20]).len(), 22);
        assert_eq!(Script::p2wsh(&[0u8; 32]).len(), 34);
    }
}
