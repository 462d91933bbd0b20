//! Hierarchical Deterministic (HD) key derivation
//!
//! BIP32 derivation over the BIP44/49/84 single-signature and BIP48 multisig
//! path conventions. Derivation is a pure function of (seed, path): nodes are
//! produced on request and dropped by the caller, never cached.

use std::fmt;
use std::str::FromStr;

use bip32::{ChildNumber, ExtendedKey, XPrv, XPub};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::address::{MultisigVariant, SingleSigScheme};
use crate::crypto::PublicKey;
use crate::error::{Error, ParamError, Result};
use crate::mnemonic::SeedMaterial;
use crate::types::{Fingerprint, Network};

/// Flag bit marking a hardened child index
pub const HARDENED: u32 = 0x8000_0000;

/// BIP48 purpose
pub const MULTISIG_PURPOSE: u32 = 48;

/// Child index validated to lie in `[0, 2^31)`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub struct DerivationIndex(u32);

impl DerivationIndex {
    pub const ZERO: DerivationIndex = DerivationIndex(0);

    pub fn new(index: u32) -> Result<Self> {
        if index >= HARDENED {
            return Err(ParamError::IndexOutOfRange(index as u64).into());
        }
        Ok(Self(index))
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// The following index, if it stays in range
    pub fn next(self) -> Result<Self> {
        Self::new(self.0 + 1)
    }
}

impl TryFrom<u32> for DerivationIndex {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DerivationIndex> for u32 {
    fn from(index: DerivationIndex) -> u32 {
        index.0
    }
}

impl fmt::Display for DerivationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversion of caller-supplied numbers into a validated child index
///
/// Lets the UI collaborator hand over whatever numeric type it parsed and
/// get a specific rejection (negative, fractional, out of range) before any
/// derivation runs.
pub trait IntoIndex {
    fn into_index(self) -> Result<DerivationIndex>;
}

impl IntoIndex for DerivationIndex {
    fn into_index(self) -> Result<DerivationIndex> {
        Ok(self)
    }
}

impl IntoIndex for u32 {
    fn into_index(self) -> Result<DerivationIndex> {
        DerivationIndex::new(self)
    }
}

impl IntoIndex for i32 {
    fn into_index(self) -> Result<DerivationIndex> {
        (self as i64).into_index()
    }
}

impl IntoIndex for i64 {
    fn into_index(self) -> Result<DerivationIndex> {
        if self < 0 {
            return Err(ParamError::NegativeIndex(self).into());
        }
        if self >= HARDENED as i64 {
            return Err(ParamError::IndexOutOfRange(self as u64).into());
        }
        Ok(DerivationIndex(self as u32))
    }
}

impl IntoIndex for f64 {
    fn into_index(self) -> Result<DerivationIndex> {
        if !self.is_finite() || self.fract() != 0.0 {
            return Err(ParamError::NonIntegerIndex.into());
        }
        if self < 0.0 {
            return Err(ParamError::NegativeIndex(self as i64).into());
        }
        if self >= HARDENED as f64 {
            return Err(ParamError::IndexOutOfRange(self as u64).into());
        }
        Ok(DerivationIndex(self as u32))
    }
}

/// External (receive) or internal (change) address chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    External,
    Change,
}

impl Chain {
    pub const fn value(self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Change => 1,
        }
    }

    pub const fn is_change(self) -> bool {
        matches!(self, Chain::Change)
    }
}

/// Conversion of a caller-supplied change flag into a [`Chain`]
pub trait IntoChain {
    fn into_chain(self) -> Result<Chain>;
}

impl IntoChain for Chain {
    fn into_chain(self) -> Result<Chain> {
        Ok(self)
    }
}

impl IntoChain for bool {
    fn into_chain(self) -> Result<Chain> {
        Ok(if self { Chain::Change } else { Chain::External })
    }
}

impl IntoChain for u32 {
    fn into_chain(self) -> Result<Chain> {
        (self as i64).into_chain()
    }
}

impl IntoChain for i64 {
    fn into_chain(self) -> Result<Chain> {
        match self {
            0 => Ok(Chain::External),
            1 => Ok(Chain::Change),
            other => Err(ParamError::InvalidChange(other).into()),
        }
    }
}

/// HD derivation path component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Index value (always below 2^31)
    pub index: u32,
    /// Whether this is a hardened derivation
    pub hardened: bool,
}

impl PathSegment {
    /// Create a normal (non-hardened) segment
    pub fn normal(index: DerivationIndex) -> Self {
        Self {
            index: index.value(),
            hardened: false,
        }
    }

    /// Create a hardened segment
    pub fn hardened(index: DerivationIndex) -> Self {
        Self {
            index: index.value(),
            hardened: true,
        }
    }

    /// Get the value to use in derivation (adds 2^31 for hardened)
    pub fn value(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED
        } else {
            self.index
        }
    }

    fn child_number(&self) -> Result<ChildNumber> {
        Ok(ChildNumber::new(self.index, self.hardened)?)
    }
}

/// HD derivation path rooted at the master node (e.g. m/84'/0'/0'/0/5)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DerivationPath {
    segments: Vec<PathSegment>,
}

impl DerivationPath {
    /// The master node itself (`m`)
    pub fn master() -> Self {
        Self::default()
    }

    /// Account-level path `m/{44|49|84}'/coin'/account'`
    pub fn single_sig_account(
        scheme: SingleSigScheme,
        network: Network,
        account: DerivationIndex,
    ) -> Self {
        Self {
            segments: vec![
                PathSegment::hardened(DerivationIndex(scheme.purpose())),
                PathSegment::hardened(DerivationIndex(network.coin_type())),
                PathSegment::hardened(account),
            ],
        }
    }

    /// Account-level path `m/48'/coin'/account'/script'`
    pub fn multisig_account(
        variant: MultisigVariant,
        network: Network,
        account: DerivationIndex,
    ) -> Self {
        Self {
            segments: vec![
                PathSegment::hardened(DerivationIndex(MULTISIG_PURPOSE)),
                PathSegment::hardened(DerivationIndex(network.coin_type())),
                PathSegment::hardened(account),
                PathSegment::hardened(DerivationIndex(variant.script_type())),
            ],
        }
    }

    /// Append `/{0|1}/index` below an account path
    pub fn address(&self, chain: Chain, index: DerivationIndex) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::normal(DerivationIndex(chain.value())));
        segments.push(PathSegment::normal(index));
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Check the path against the BIP44/49/84/48 hardening rules
    ///
    /// Purpose, coin, account (and the BIP48 script type) must be hardened;
    /// chain and address index must not be, and the chain must be 0 or 1.
    pub fn validate_scheme(&self) -> Result<()> {
        let purpose = self
            .segments
            .first()
            .ok_or_else(|| ParamError::InvalidPath("path has no purpose".to_string()))?;

        let hardened_depth = match purpose.index {
            44 | 49 | 84 => 3,
            MULTISIG_PURPOSE => 4,
            other => {
                return Err(ParamError::InvalidPath(format!("unknown purpose {}", other)).into())
            }
        };

        if self.segments.len() < hardened_depth || self.segments.len() > hardened_depth + 2 {
            return Err(ParamError::InvalidPath(format!(
                "expected {} to {} segments, got {}",
                hardened_depth,
                hardened_depth + 2,
                self.segments.len()
            ))
            .into());
        }

        for (depth, segment) in self.segments.iter().enumerate() {
            let must_harden = depth < hardened_depth;
            if segment.hardened != must_harden {
                return Err(ParamError::InvalidPath(format!(
                    "segment {} must {}be hardened",
                    depth,
                    if must_harden { "" } else { "not " }
                ))
                .into());
            }
        }

        if purpose.index == MULTISIG_PURPOSE && self.segments[3].index > 2 {
            return Err(ParamError::InvalidPath("BIP48 script type must be 0, 1 or 2".to_string()).into());
        }

        if let Some(chain) = self.segments.get(hardened_depth) {
            if chain.index > 1 {
                return Err(ParamError::InvalidChange(chain.index as i64).into());
            }
        }

        Ok(())
    }

    /// Convert to string representation (e.g. "m/84'/0'/0'/0/0")
    pub fn to_string_path(&self) -> String {
        let mut s = String::from("m");
        for segment in &self.segments {
            s.push('/');
            s.push_str(&segment.index.to_string());
            if segment.hardened {
                s.push('\'');
            }
        }
        s
    }

    /// Render without the `m/` root using `h` for hardened segments, the
    /// form used inside output descriptor key origins
    pub fn to_origin_string(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("{}{}", s.index, if s.hardened { "h" } else { "" }))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_path())
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(ParamError::InvalidPath("path must start with 'm'".to_string()).into());
        }

        let mut segments = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix(|c: char| matches!(c, '\'' | 'h' | 'H')) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParamError::InvalidPath(format!("bad segment '{}'", part)).into());
            }
            let value: u64 = digits
                .parse()
                .map_err(|_| ParamError::InvalidPath(format!("bad segment '{}'", part)))?;
            if value >= HARDENED as u64 {
                return Err(ParamError::IndexOutOfRange(value).into());
            }
            segments.push(PathSegment {
                index: value as u32,
                hardened,
            });
        }

        Ok(Self { segments })
    }
}

impl Serialize for DerivationPath {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string_path())
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// BIP32 master node for an unlocked wallet
pub struct MasterKey {
    xprv: XPrv,
    fingerprint: Fingerprint,
}

impl MasterKey {
    /// Create the master node from a 64-byte seed
    pub fn from_seed(seed: &SeedMaterial) -> Result<Self> {
        let xprv = XPrv::new(seed.as_bytes())?;
        let public = PublicKey::from_slice(&xprv.public_key().to_bytes())?;
        let hash = public.hash160();
        let fingerprint = Fingerprint::new([hash[0], hash[1], hash[2], hash[3]]);
        Ok(Self { xprv, fingerprint })
    }

    /// Fingerprint of the master public key; identifies the signer
    /// independently of any account or path
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Derive the node at `path`
    pub fn derive(&self, path: &DerivationPath) -> Result<KeyNode> {
        let mut xprv = self.xprv.clone();
        for segment in path.segments() {
            xprv = xprv.derive_child(segment.child_number()?)?;
        }
        Ok(KeyNode {
            path: path.clone(),
            xprv,
        })
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// A derived key node: private scalar, public point, and chain code
pub struct KeyNode {
    path: DerivationPath,
    xprv: XPrv,
}

impl KeyNode {
    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Raw private scalar
    pub fn private_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.xprv.to_bytes())
    }

    /// Compressed public key
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_slice(&self.xprv.public_key().to_bytes())
    }

    pub fn chain_code(&self) -> [u8; 32] {
        self.xprv.attrs().chain_code
    }

    pub fn depth(&self) -> u8 {
        self.xprv.attrs().depth
    }

    pub fn parent_fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.xprv.attrs().parent_fingerprint)
    }

    /// Strip the private key and serialize the extended public key
    ///
    /// The result only supports public (unhardened) derivation and never
    /// yields signing capability.
    pub fn neuter(&self, network: Network) -> String {
        self.xprv.public_key().to_string(network.xpub_prefix())
    }
}

impl fmt::Debug for KeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyNode")
            .field("path", &self.path.to_string_path())
            .finish_non_exhaustive()
    }
}

/// Explicit session holding at most one live master key
///
/// Replaces ambient cached key state: the unlocked master lives here and is
/// passed by reference into derivation calls. Locking drops it.
#[derive(Debug)]
pub struct WalletSession {
    network: Network,
    master: Option<MasterKey>,
}

impl WalletSession {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            master: None,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Load the master node for `seed`, replacing any previous one
    pub fn unlock(&mut self, seed: &SeedMaterial) -> Result<()> {
        self.master = Some(MasterKey::from_seed(seed)?);
        debug!(network = %self.network, "wallet session unlocked");
        Ok(())
    }

    /// Drop the master node
    pub fn lock(&mut self) {
        if self.master.take().is_some() {
            debug!("wallet session locked");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.master.is_some()
    }

    pub fn master(&self) -> Result<&MasterKey> {
        self.master
            .as_ref()
            .ok_or_else(|| Error::InvalidKeyMaterial("wallet is locked".to_string()))
    }

    /// Run `f` against the unlocked master node
    pub fn with_master<T>(&self, f: impl FnOnce(&MasterKey) -> Result<T>) -> Result<T> {
        f(self.master()?)
    }
}

/// Derive a single-sig account node `m/purpose'/coin'/account'`
#[instrument(skip(master, account))]
pub fn derive_account_node(
    master: &MasterKey,
    scheme: SingleSigScheme,
    network: Network,
    account: impl IntoIndex,
) -> Result<KeyNode> {
    let account = account.into_index()?;
    master.derive(&DerivationPath::single_sig_account(scheme, network, account))
}

/// Derive a single-sig address node `m/purpose'/coin'/account'/change/index`
///
/// All parameters are validated before any derivation runs.
#[instrument(skip(master, account, change, index))]
pub fn derive_address_node(
    master: &MasterKey,
    scheme: SingleSigScheme,
    network: Network,
    account: impl IntoIndex,
    change: impl IntoChain,
    index: impl IntoIndex,
) -> Result<KeyNode> {
    let account = account.into_index()?;
    let chain = change.into_chain()?;
    let index = index.into_index()?;
    let path = DerivationPath::single_sig_account(scheme, network, account).address(chain, index);
    master.derive(&path)
}

/// Derive a BIP48 multisig account node `m/48'/coin'/account'/script'`
#[instrument(skip(master, account))]
pub fn derive_multisig_account_node(
    master: &MasterKey,
    variant: MultisigVariant,
    network: Network,
    account: impl IntoIndex,
) -> Result<KeyNode> {
    let account = account.into_index()?;
    master.derive(&DerivationPath::multisig_account(variant, network, account))
}

/// Derive an arbitrary path after checking it against the scheme rules
pub fn derive_path(master: &MasterKey, path: &DerivationPath) -> Result<KeyNode> {
    path.validate_scheme()?;
    master.derive(path)
}

/// Parse an extended public key, requiring it to belong to `network`
///
/// Extended private keys are refused outright. Error messages never contain
/// the input.
pub fn decode_xpub(encoded: &str, network: Network) -> Result<XPub> {
    let key = ExtendedKey::from_str(encoded.trim())
        .map_err(|_| Error::InvalidKeyMaterial("not a valid extended key".to_string()))?;
    match Network::from_extended_prefix(key.prefix) {
        Some((_, false)) => Err(Error::InvalidKeyMaterial(
            "extended private key supplied where a public key was expected".to_string(),
        )),
        Some((found, true)) if found == network => XPub::try_from(key)
            .map_err(|_| Error::InvalidKeyMaterial("extended public key is malformed".to_string())),
        Some(_) => Err(Error::NetworkMismatch { expected: network }),
        None => Err(Error::InvalidKeyMaterial(
            "unrecognised extended key prefix".to_string(),
        )),
    }
}

/// Public child key at `chain/index` below an account-level xpub
pub fn derive_public_child(
    account_xpub: &XPub,
    chain: Chain,
    index: DerivationIndex,
) -> Result<PublicKey> {
    let child = account_xpub
        .derive_child(ChildNumber::new(chain.value(), false)?)?
        .derive_child(ChildNumber::new(index.value(), false)?)?;
    PublicKey::from_slice(&child.to_bytes())
}
