//! Multisig coordination: xpub exchange, validation, and account assembly
//!
//! Cosigners only ever exchange public data. Each participant exports the
//! BIP48 account xpub for the agreed configuration and script variant,
//! validates every key it receives, and assembles the same
//! [`MultisigAccountDescriptor`]. Because the script builder sorts keys
//! (BIP67), every participant derives identical addresses no matter what
//! order the cosigner list was entered in.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use bip32::{ChildNumber, ExtendedKey, XPub};
use miniscript::descriptor::{Descriptor, DescriptorPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::address::{multisig_address, BuiltAddress, MultisigVariant};
use crate::error::{Error, ParamError, Result};
use crate::hd::{
    decode_xpub, derive_multisig_account_node, derive_public_child, Chain, DerivationIndex,
    DerivationPath, IntoChain, IntoIndex, MasterKey,
};
use crate::types::{Fingerprint, Network};

/// Depth of a BIP48 account node (`m/48'/coin'/account'/script'`)
pub const MULTISIG_ACCOUNT_DEPTH: u8 = 4;

/// Supported M-of-N configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MultisigConfig {
    TwoOfTwo,
    TwoOfThree,
    ThreeOfFive,
}

impl MultisigConfig {
    /// Required signatures
    pub const fn m(self) -> usize {
        match self {
            MultisigConfig::TwoOfTwo | MultisigConfig::TwoOfThree => 2,
            MultisigConfig::ThreeOfFive => 3,
        }
    }

    /// Total keys
    pub const fn n(self) -> usize {
        match self {
            MultisigConfig::TwoOfTwo => 2,
            MultisigConfig::TwoOfThree => 3,
            MultisigConfig::ThreeOfFive => 5,
        }
    }

    /// Keys that must come from other participants
    pub const fn cosigners_required(self) -> usize {
        self.n() - 1
    }
}

impl TryFrom<(usize, usize)> for MultisigConfig {
    type Error = Error;

    fn try_from((m, n): (usize, usize)) -> Result<Self> {
        match (m, n) {
            (2, 2) => Ok(MultisigConfig::TwoOfTwo),
            (2, 3) => Ok(MultisigConfig::TwoOfThree),
            (3, 5) => Ok(MultisigConfig::ThreeOfFive),
            _ => Err(Error::UnsupportedConfiguration { m, n }),
        }
    }
}

impl fmt::Display for MultisigConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-of-{}", self.m(), self.n())
    }
}

impl FromStr for MultisigConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (m, n) = s
            .split_once("-of-")
            .ok_or_else(|| ParamError::Other(format!("expected M-of-N, got '{}'", s)))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| Error::from(ParamError::Other(format!("expected M-of-N, got '{}'", s))))
        };
        MultisigConfig::try_from((parse(m)?, parse(n)?))
    }
}

impl TryFrom<String> for MultisigConfig {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MultisigConfig> for String {
    fn from(config: MultisigConfig) -> String {
        config.to_string()
    }
}

/// What a participant hands to the other cosigners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpubExport {
    pub xpub: String,
    /// Master fingerprint, identifying the signer regardless of path
    pub fingerprint: Fingerprint,
    pub derivation_path: DerivationPath,
    pub network: Network,
    pub config: MultisigConfig,
    pub variant: MultisigVariant,
    pub account_index: DerivationIndex,
}

/// Export the BIP48 account xpub for a multisig setup
#[instrument(skip(master, account))]
pub fn export_xpub(
    master: &MasterKey,
    config: MultisigConfig,
    variant: MultisigVariant,
    account: impl IntoIndex,
    network: Network,
) -> Result<XpubExport> {
    let account = account.into_index()?;
    let node = derive_multisig_account_node(master, variant, network, account)?;

    let export = XpubExport {
        xpub: node.neuter(network),
        fingerprint: master.fingerprint(),
        derivation_path: node.path().clone(),
        network,
        config,
        variant,
        account_index: account,
    };
    info!(fingerprint = %export.fingerprint, path = %export.derivation_path, "exported multisig xpub");
    Ok(export)
}

/// Outcome of checking a cosigner xpub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpubValidation {
    pub valid: bool,
    /// Human readable problems; never contains the candidate itself
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XpubIssue {
    Malformed,
    PrivateKey,
    UnknownPrefix,
    WrongNetwork(Network),
    WrongDepth(u8),
    WrongScriptType(MultisigConfig, MultisigVariant),
}

impl fmt::Display for XpubIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XpubIssue::Malformed => f.write_str("Key could not be decoded as an extended public key"),
            XpubIssue::PrivateKey => {
                f.write_str("Key is an extended private key; share only the public key")
            }
            XpubIssue::UnknownPrefix => f.write_str("Key has an unrecognised version prefix"),
            XpubIssue::WrongNetwork(expected) => {
                write!(f, "Key belongs to a different network (expected {})", expected)
            }
            XpubIssue::WrongDepth(depth) => write!(
                f,
                "Key is at depth {} but a BIP48 account key must be at depth {}",
                depth, MULTISIG_ACCOUNT_DEPTH
            ),
            XpubIssue::WrongScriptType(config, variant) => write!(
                f,
                "Key was not derived for a {} {} account (expected script type {}')",
                config,
                variant,
                variant.script_type()
            ),
        }
    }
}

/// Decode and check a candidate; returns the key when every check passes
fn inspect_xpub(
    candidate: &str,
    config: MultisigConfig,
    variant: MultisigVariant,
    network: Network,
) -> (Option<XPub>, Vec<XpubIssue>) {
    let key = match ExtendedKey::from_str(candidate.trim()) {
        Ok(key) => key,
        Err(_) => return (None, vec![XpubIssue::Malformed]),
    };

    let mut issues = Vec::new();
    match Network::from_extended_prefix(key.prefix) {
        Some((found, is_public)) => {
            if !is_public {
                issues.push(XpubIssue::PrivateKey);
            }
            if found != network {
                issues.push(XpubIssue::WrongNetwork(network));
            }
        }
        None => issues.push(XpubIssue::UnknownPrefix),
    }

    if key.attrs.depth != MULTISIG_ACCOUNT_DEPTH {
        issues.push(XpubIssue::WrongDepth(key.attrs.depth));
    } else if ChildNumber::new(variant.script_type(), true).ok() != Some(key.attrs.child_number) {
        issues.push(XpubIssue::WrongScriptType(config, variant));
    }

    if !issues.is_empty() {
        return (None, issues);
    }

    match XPub::try_from(key) {
        Ok(xpub) => (Some(xpub), issues),
        Err(_) => (None, vec![XpubIssue::Malformed]),
    }
}

/// Check a cosigner xpub against the agreed setup
///
/// Collects every problem instead of stopping at the first, so the user
/// can be told exactly what is wrong.
#[instrument(skip(candidate))]
pub fn validate_xpub(
    candidate: &str,
    config: MultisigConfig,
    variant: MultisigVariant,
    network: Network,
) -> XpubValidation {
    let (_, issues) = inspect_xpub(candidate, config, variant, network);
    if !issues.is_empty() {
        debug!(issues = issues.len(), "cosigner xpub rejected");
    }
    XpubValidation {
        valid: issues.is_empty(),
        errors: issues.iter().map(ToString::to_string).collect(),
    }
}

/// A cosigner's public contribution as entered by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignerInput {
    pub name: String,
    pub xpub: String,
    pub fingerprint: Fingerprint,
}

/// One key holder in a multisig account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cosigner {
    pub name: String,
    pub xpub: String,
    pub fingerprint: Fingerprint,
    pub derivation_path: DerivationPath,
    pub is_self: bool,
}

/// A fully assembled M-of-N account shared by every cosigner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigAccountDescriptor {
    pub name: String,
    pub config: MultisigConfig,
    pub variant: MultisigVariant,
    pub network: Network,
    pub account_index: DerivationIndex,
    /// In the order the user entered them; sorting happens per address
    pub cosigners: Vec<Cosigner>,
}

/// Assemble a multisig account from our export plus the cosigners' keys
///
/// `cosigners` excludes ourselves and must hold exactly N-1 entries.
#[instrument(skip(own, cosigners), fields(config = %own.config, variant = %own.variant))]
pub fn create_multisig_account(
    name: &str,
    own: &XpubExport,
    cosigners: &[CosignerInput],
) -> Result<MultisigAccountDescriptor> {
    let config = own.config;
    if cosigners.len() != config.cosigners_required() {
        return Err(Error::ConfigMismatch {
            expected: config.cosigners_required(),
            actual: cosigners.len(),
        });
    }

    let path = DerivationPath::multisig_account(own.variant, own.network, own.account_index);
    if own.derivation_path != path {
        return Err(Error::InvalidKeyMaterial(
            "own export does not match its declared configuration".to_string(),
        ));
    }

    let mut all = Vec::with_capacity(config.n());
    all.push(Cosigner {
        name: "Me".to_string(),
        xpub: own.xpub.clone(),
        fingerprint: own.fingerprint,
        derivation_path: path.clone(),
        is_self: true,
    });
    for input in cosigners {
        all.push(Cosigner {
            name: input.name.clone(),
            xpub: input.xpub.trim().to_string(),
            fingerprint: input.fingerprint,
            derivation_path: path.clone(),
            is_self: false,
        });
    }

    let mut keys = HashSet::with_capacity(all.len());
    let mut fingerprints = HashSet::with_capacity(all.len());
    for cosigner in &all {
        let (xpub, issues) = inspect_xpub(&cosigner.xpub, config, own.variant, own.network);
        if issues
            .iter()
            .any(|issue| matches!(issue, XpubIssue::WrongNetwork(_)))
        {
            return Err(Error::NetworkMismatch {
                expected: own.network,
            });
        }
        let xpub = xpub.ok_or_else(|| {
            let reasons: Vec<String> = issues.iter().map(ToString::to_string).collect();
            Error::InvalidKeyMaterial(format!(
                "cosigner '{}': {}",
                cosigner.name,
                reasons.join("; ")
            ))
        })?;

        if !keys.insert(xpub.to_bytes()) {
            warn!(cosigner = %cosigner.name, "duplicate cosigner key");
            return Err(Error::InvalidKeyMaterial(format!(
                "cosigner '{}' repeats another participant's key",
                cosigner.name
            )));
        }
        if !fingerprints.insert(cosigner.fingerprint) {
            return Err(Error::InvalidKeyMaterial(format!(
                "cosigner '{}' repeats another participant's fingerprint",
                cosigner.name
            )));
        }
    }

    info!(cosigners = all.len(), "multisig account assembled");
    Ok(MultisigAccountDescriptor {
        name: name.to_string(),
        config,
        variant: own.variant,
        network: own.network,
        account_index: own.account_index,
        cosigners: all,
    })
}

impl MultisigAccountDescriptor {
    pub fn threshold(&self) -> usize {
        self.config.m()
    }

    pub fn self_cosigner(&self) -> Option<&Cosigner> {
        self.cosigners.iter().find(|c| c.is_self)
    }

    /// BIP48 account path shared by every cosigner
    pub fn account_path(&self) -> DerivationPath {
        DerivationPath::multisig_account(self.variant, self.network, self.account_index)
    }

    /// Derive the shared address at `chain/index`
    ///
    /// Each cosigner's child key comes from its xpub, so any participant (or
    /// a watch-only device) computes the same address and scripts.
    pub fn address_at(&self, chain: impl IntoChain, index: impl IntoIndex) -> Result<BuiltAddress> {
        let chain = chain.into_chain()?;
        let index = index.into_index()?;

        let keys = self
            .cosigners
            .iter()
            .map(|c| {
                let xpub = decode_xpub(&c.xpub, self.network)?;
                derive_public_child(&xpub, chain, index)
            })
            .collect::<Result<Vec<_>>>()?;

        multisig_address(&keys, self.threshold(), self.variant, self.network)
    }

    /// Full derivation path of the address at `chain/index`
    pub fn address_path(&self, chain: Chain, index: DerivationIndex) -> DerivationPath {
        self.account_path().address(chain, index)
    }

    /// Render a BIP380 `sortedmulti` descriptor for one chain, with checksum
    pub fn to_output_descriptor(&self, chain: Chain) -> Result<String> {
        let origin = self.account_path().to_origin_string();
        let keys = self
            .cosigners
            .iter()
            .map(|c| {
                format!("[{}/{}]{}/{}/*", c.fingerprint, origin, c.xpub, chain.value())
                    .parse::<DescriptorPublicKey>()
                    .map_err(|e| {
                        Error::InvalidKeyMaterial(format!("cosigner '{}': {}", c.name, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let threshold = self.threshold();
        let descriptor = match self.variant {
            MultisigVariant::P2sh => Descriptor::new_sh_sortedmulti(threshold, keys),
            MultisigVariant::P2shP2wsh => Descriptor::new_sh_wsh_sortedmulti(threshold, keys),
            MultisigVariant::P2wsh => Descriptor::new_wsh_sortedmulti(threshold, keys),
        }
        .map_err(|e| Error::InvalidKeyMaterial(format!("descriptor: {}", e)))?;

        // Display appends the checksum
        Ok(descriptor.to_string())
    }
}
