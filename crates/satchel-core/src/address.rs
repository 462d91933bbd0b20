//! Address construction, detection, and validation
//!
//! Every spendable scheme is a variant of a closed enum; builders match
//! exhaustively so adding a scheme is a compile error until it is handled
//! everywhere.

use std::fmt;

use bech32::segwit;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::crypto::PublicKey;
use crate::error::{Error, Result};
use crate::hd::DerivationPath;
use crate::script::Script;
use crate::types::Network;

/// Single-signature address scheme and its BIP purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SingleSigScheme {
    /// BIP44 pay-to-pubkey-hash
    Legacy,
    /// BIP49 P2WPKH nested in P2SH
    WrappedSegwit,
    /// BIP84 native P2WPKH
    NativeSegwit,
}

impl SingleSigScheme {
    pub const ALL: [SingleSigScheme; 3] = [
        SingleSigScheme::Legacy,
        SingleSigScheme::WrappedSegwit,
        SingleSigScheme::NativeSegwit,
    ];

    pub const fn purpose(self) -> u32 {
        match self {
            SingleSigScheme::Legacy => 44,
            SingleSigScheme::WrappedSegwit => 49,
            SingleSigScheme::NativeSegwit => 84,
        }
    }

    pub const fn address_type(self) -> AddressType {
        match self {
            SingleSigScheme::Legacy => AddressType::P2pkh,
            SingleSigScheme::WrappedSegwit => AddressType::P2shP2wpkh,
            SingleSigScheme::NativeSegwit => AddressType::P2wpkh,
        }
    }
}

/// Multisig script variant and its BIP48 script type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultisigVariant {
    /// Bare multisig in P2SH (script type 0')
    P2sh,
    /// P2WSH nested in P2SH (script type 1')
    P2shP2wsh,
    /// Native P2WSH (script type 2')
    P2wsh,
}

impl MultisigVariant {
    pub const ALL: [MultisigVariant; 3] = [
        MultisigVariant::P2sh,
        MultisigVariant::P2shP2wsh,
        MultisigVariant::P2wsh,
    ];

    pub const fn script_type(self) -> u32 {
        match self {
            MultisigVariant::P2sh => 0,
            MultisigVariant::P2shP2wsh => 1,
            MultisigVariant::P2wsh => 2,
        }
    }

    pub const fn address_type(self) -> AddressType {
        match self {
            MultisigVariant::P2sh => AddressType::P2sh,
            MultisigVariant::P2shP2wsh => AddressType::P2shP2wsh,
            MultisigVariant::P2wsh => AddressType::P2wsh,
        }
    }
}

impl fmt::Display for MultisigVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MultisigVariant::P2sh => "P2SH",
            MultisigVariant::P2shP2wsh => "P2SH-P2WSH",
            MultisigVariant::P2wsh => "P2WSH",
        })
    }
}

/// Every address type the wallet produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    P2pkh,
    P2shP2wpkh,
    P2wpkh,
    P2sh,
    P2shP2wsh,
    P2wsh,
}

impl AddressType {
    /// The on-chain encoding this type is indistinguishable from
    pub const fn kind(self) -> AddressKind {
        match self {
            AddressType::P2pkh => AddressKind::P2pkh,
            AddressType::P2shP2wpkh | AddressType::P2sh | AddressType::P2shP2wsh => {
                AddressKind::P2sh
            }
            AddressType::P2wpkh => AddressKind::P2wpkh,
            AddressType::P2wsh => AddressKind::P2wsh,
        }
    }
}

/// Address encoding as recoverable from the address string alone
///
/// All P2SH-wrapped types collapse into [`AddressKind::P2sh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::P2pkh => "p2pkh",
            AddressKind::P2sh => "p2sh",
            AddressKind::P2wpkh => "p2wpkh",
            AddressKind::P2wsh => "p2wsh",
        }
    }
}

/// An address together with the scripts needed to spend from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltAddress {
    pub address: String,
    pub address_type: AddressType,
    /// P2SH redeem script (wrapped segwit and P2SH multisig)
    pub redeem_script: Option<Script>,
    /// P2WSH witness script (native and wrapped P2WSH multisig)
    pub witness_script: Option<Script>,
}

/// Build a single-signature address for `pubkey`
pub fn single_sig_address(
    pubkey: &PublicKey,
    scheme: SingleSigScheme,
    network: Network,
) -> Result<BuiltAddress> {
    let hash = pubkey.hash160();
    let (address, redeem_script) = match scheme {
        SingleSigScheme::Legacy => (base58_address(network.p2pkh_version(), &hash), None),
        SingleSigScheme::WrappedSegwit => {
            let redeem = Script::p2wpkh(&hash);
            (
                base58_address(network.p2sh_version(), &redeem.script_hash()),
                Some(redeem),
            )
        }
        SingleSigScheme::NativeSegwit => (segwit_address(network, &hash)?, None),
    };

    Ok(BuiltAddress {
        address,
        address_type: scheme.address_type(),
        redeem_script,
        witness_script: None,
    })
}

/// Single-signature address from raw key bytes; missing keys are rejected
pub fn single_sig_address_from_bytes(
    pubkey: Option<&[u8]>,
    scheme: SingleSigScheme,
    network: Network,
) -> Result<BuiltAddress> {
    let bytes = pubkey
        .ok_or_else(|| Error::InvalidKeyMaterial("public key is missing".to_string()))?;
    single_sig_address(&PublicKey::from_slice(bytes)?, scheme, network)
}

/// Build an M-of-N multisig address
///
/// Keys are sorted (BIP67) inside [`Script::sorted_multisig`], so the result
/// depends only on the key set, never on the order it is passed in.
#[instrument(skip(pubkeys), fields(n = pubkeys.len()))]
pub fn multisig_address(
    pubkeys: &[PublicKey],
    threshold: usize,
    variant: MultisigVariant,
    network: Network,
) -> Result<BuiltAddress> {
    let multisig = Script::sorted_multisig(threshold, pubkeys)?;

    let built = match variant {
        MultisigVariant::P2sh => BuiltAddress {
            address: base58_address(network.p2sh_version(), &multisig.script_hash()),
            address_type: AddressType::P2sh,
            redeem_script: Some(multisig),
            witness_script: None,
        },
        MultisigVariant::P2wsh => BuiltAddress {
            address: segwit_address(network, &multisig.witness_script_hash())?,
            address_type: AddressType::P2wsh,
            redeem_script: None,
            witness_script: Some(multisig),
        },
        MultisigVariant::P2shP2wsh => {
            let redeem = Script::p2wsh(&multisig.witness_script_hash());
            BuiltAddress {
                address: base58_address(network.p2sh_version(), &redeem.script_hash()),
                address_type: AddressType::P2shP2wsh,
                redeem_script: Some(redeem),
                witness_script: Some(multisig),
            }
        }
    };

    debug!(address_type = ?built.address_type, "built multisig address");
    Ok(built)
}

/// Detect the encoding of `address`, requiring it to belong to `network`
///
/// A well-formed address for the other network fails with
/// [`Error::NetworkMismatch`], even though its checksum is valid.
pub fn detect_address_type(address: &str, network: Network) -> Result<AddressKind> {
    let (kind, found, _) = decode_address(address)?;
    if found != network {
        return Err(Error::NetworkMismatch { expected: network });
    }
    Ok(kind)
}

/// `true` if `address` is a well-formed address on `network`
pub fn validate_address(address: &str, network: Network) -> bool {
    detect_address_type(address, network).is_ok()
}

/// Output script paying to `address`
pub fn script_pubkey(address: &str, network: Network) -> Result<Script> {
    let (kind, found, program) = decode_address(address)?;
    if found != network {
        return Err(Error::NetworkMismatch { expected: network });
    }
    Ok(match kind {
        AddressKind::P2pkh => Script::p2pkh(&to_array(&program)?),
        AddressKind::P2sh => Script::p2sh(&to_array(&program)?),
        AddressKind::P2wpkh => Script::p2wpkh(&to_array(&program)?),
        AddressKind::P2wsh => Script::p2wsh(&to_array(&program)?),
    })
}

fn decode_address(address: &str) -> Result<(AddressKind, Network, Vec<u8>)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::InvalidAddress("empty address".to_string()));
    }

    let lower = address.to_ascii_lowercase();
    if lower.starts_with("bc1") || lower.starts_with("tb1") {
        return decode_segwit(address);
    }

    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| Error::InvalidAddress("bad base58 checksum".to_string()))?;
    if payload.len() != 21 {
        return Err(Error::InvalidAddress("wrong payload length".to_string()));
    }

    let (kind, network) = match payload[0] {
        0x00 => (AddressKind::P2pkh, Network::Mainnet),
        0x05 => (AddressKind::P2sh, Network::Mainnet),
        0x6f => (AddressKind::P2pkh, Network::Testnet),
        0xc4 => (AddressKind::P2sh, Network::Testnet),
        _ => return Err(Error::InvalidAddress("unknown version byte".to_string())),
    };
    Ok((kind, network, payload[1..].to_vec()))
}

fn decode_segwit(address: &str) -> Result<(AddressKind, Network, Vec<u8>)> {
    let (hrp, version, program) = segwit::decode(address)
        .map_err(|_| Error::InvalidAddress("bad bech32 encoding".to_string()))?;

    let network = if hrp == Network::Mainnet.hrp() {
        Network::Mainnet
    } else if hrp == Network::Testnet.hrp() {
        Network::Testnet
    } else {
        return Err(Error::InvalidAddress("unknown bech32 prefix".to_string()));
    };

    if version != segwit::VERSION_0 {
        return Err(Error::InvalidAddress(
            "only witness version 0 is supported".to_string(),
        ));
    }

    let kind = match program.len() {
        20 => AddressKind::P2wpkh,
        32 => AddressKind::P2wsh,
        _ => return Err(Error::InvalidAddress("wrong witness program length".to_string())),
    };
    Ok((kind, network, program))
}

fn base58_address(version: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

fn segwit_address(network: Network, program: &[u8]) -> Result<String> {
    segwit::encode(network.hrp(), segwit::VERSION_0, program)
        .map_err(|e| Error::InvalidAddress(format!("segwit encoding failed: {}", e)))
}

fn to_array<const N: usize>(program: &[u8]) -> Result<[u8; N]> {
    program
        .try_into()
        .map_err(|_| Error::InvalidAddress("wrong program length".to_string()))
}

/// A generated address and its bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    pub address: String,
    pub address_type: AddressType,
    derivation_path: DerivationPath,
    pub index: u32,
    pub is_change: bool,
    used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_script: Option<String>,
}

impl AddressRecord {
    pub fn new(built: BuiltAddress, derivation_path: DerivationPath, index: u32, is_change: bool) -> Self {
        Self {
            address: built.address,
            address_type: built.address_type,
            derivation_path,
            index,
            is_change,
            used: false,
            redeem_script: built.redeem_script.map(|s| s.to_hex()),
            witness_script: built.witness_script.map(|s| s.to_hex()),
        }
    }

    /// Path the address was derived at; fixed once the record exists
    pub fn derivation_path(&self) -> &DerivationPath {
        &self.derivation_path
    }

    pub fn used(&self) -> bool {
        self.used
    }

    /// Record observed chain activity
    pub fn mark_used(&mut self) {
        self.used = true;
    }
}
