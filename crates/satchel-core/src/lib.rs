//! Satchel Core - key derivation, addresses, and multisig coordination
//!
//! This crate holds the deterministic, stateless half of the Satchel wallet:
//! BIP39 mnemonics and WIF encoding, BIP32 derivation along the
//! BIP44/49/84/48 path conventions, address and script construction for
//! single-signature and BIP67 multisig outputs, and the xpub exchange that
//! lets mutually untrusting cosigners assemble the same multisig account.
//!
//! Nothing here touches storage. Encrypted persistence lives in
//! `satchel-vault`.

pub mod account;
pub mod address;
pub mod crypto;
pub mod error;
pub mod hd;
pub mod mnemonic;
pub mod multisig;
pub mod script;
pub mod types;
pub mod wif;

pub use account::{Account, AddressCursor, MultisigAccount, SingleSigAccount};
pub use address::{
    detect_address_type, multisig_address, script_pubkey, single_sig_address,
    single_sig_address_from_bytes, validate_address, AddressKind, AddressRecord, AddressType,
    BuiltAddress, MultisigVariant, SingleSigScheme,
};
pub use crypto::{hash160, sha256, PublicKey};
pub use error::{Error, ParamError, Result};
pub use hd::{
    decode_xpub, derive_account_node, derive_address_node, derive_multisig_account_node,
    derive_path, derive_public_child, Chain, DerivationIndex, DerivationPath, IntoChain,
    IntoIndex, KeyNode, MasterKey, PathSegment, WalletSession,
};
pub use mnemonic::{
    entropy_to_mnemonic, generate_mnemonic, mnemonic_to_entropy, mnemonic_to_seed,
    validate_mnemonic, SeedMaterial,
};
pub use multisig::{
    create_multisig_account, export_xpub, validate_xpub, Cosigner, CosignerInput,
    MultisigAccountDescriptor, MultisigConfig, XpubExport, XpubValidation,
};
pub use script::Script;
pub use types::{Fingerprint, Network};
pub use wif::{decode_wif, private_key_to_wif, DecodedWif};

/// Default mnemonic strength in bits (12 words)
pub const DEFAULT_MNEMONIC_STRENGTH: u32 = 128;
