//! Account bookkeeping: address cursors and generated address records
//!
//! Accounts hold only public data (the account xpub, or the multisig
//! descriptor), so new receive and change addresses can be produced while
//! the wallet is locked.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{single_sig_address, AddressRecord, AddressType, SingleSigScheme};
use crate::error::Result;
use crate::hd::{
    decode_xpub, derive_account_node, derive_public_child, Chain, DerivationIndex, DerivationPath,
    IntoIndex, MasterKey,
};
use crate::multisig::MultisigAccountDescriptor;
use crate::types::Network;

/// Next unused index on each chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressCursor {
    pub external: DerivationIndex,
    pub change: DerivationIndex,
}

impl AddressCursor {
    fn get(&self, chain: Chain) -> DerivationIndex {
        match chain {
            Chain::External => self.external,
            Chain::Change => self.change,
        }
    }

    fn advance(&mut self, chain: Chain) -> Result<DerivationIndex> {
        let slot = match chain {
            Chain::External => &mut self.external,
            Chain::Change => &mut self.change,
        };
        let current = *slot;
        *slot = current.next()?;
        Ok(current)
    }
}

/// A BIP44/49/84 account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleSigAccount {
    pub name: String,
    pub scheme: SingleSigScheme,
    pub network: Network,
    pub index: DerivationIndex,
    pub xpub: String,
    #[serde(default)]
    pub cursor: AddressCursor,
    #[serde(default)]
    pub addresses: Vec<AddressRecord>,
}

impl SingleSigAccount {
    /// Derive the account node and keep only its xpub
    pub fn create(
        master: &MasterKey,
        name: &str,
        scheme: SingleSigScheme,
        network: Network,
        account: impl IntoIndex,
    ) -> Result<Self> {
        let index = account.into_index()?;
        let node = derive_account_node(master, scheme, network, index)?;
        Ok(Self {
            name: name.to_string(),
            scheme,
            network,
            index,
            xpub: node.neuter(network),
            cursor: AddressCursor::default(),
            addresses: Vec::new(),
        })
    }

    pub fn address_type(&self) -> AddressType {
        self.scheme.address_type()
    }

    pub fn path(&self) -> DerivationPath {
        DerivationPath::single_sig_account(self.scheme, self.network, self.index)
    }

    /// Build the address at `chain/index` without recording it
    pub fn address_at(&self, chain: Chain, index: DerivationIndex) -> Result<AddressRecord> {
        let xpub = decode_xpub(&self.xpub, self.network)?;
        let pubkey = derive_public_child(&xpub, chain, index)?;
        let built = single_sig_address(&pubkey, self.scheme, self.network)?;
        Ok(AddressRecord::new(
            built,
            self.path().address(chain, index),
            index.value(),
            chain.is_change(),
        ))
    }

    /// Generate and record the next address on `chain`
    pub fn next_address(&mut self, chain: Chain) -> Result<&AddressRecord> {
        let index = self.cursor.get(chain);
        let record = self.address_at(chain, index)?;
        self.cursor.advance(chain)?;
        debug!(account = %self.name, path = %record.derivation_path(), "generated address");
        self.addresses.push(record);
        Ok(&self.addresses[self.addresses.len() - 1])
    }

    /// Flag a recorded address as used; `false` if the account never issued it
    pub fn mark_used(&mut self, address: &str) -> bool {
        mark_used(&mut self.addresses, address)
    }
}

/// A multisig account plus this wallet's address bookkeeping for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigAccount {
    pub descriptor: MultisigAccountDescriptor,
    #[serde(default)]
    pub cursor: AddressCursor,
    #[serde(default)]
    pub addresses: Vec<AddressRecord>,
}

impl MultisigAccount {
    pub fn new(descriptor: MultisigAccountDescriptor) -> Self {
        Self {
            descriptor,
            cursor: AddressCursor::default(),
            addresses: Vec::new(),
        }
    }

    pub fn address_at(&self, chain: Chain, index: DerivationIndex) -> Result<AddressRecord> {
        let built = self.descriptor.address_at(chain, index)?;
        Ok(AddressRecord::new(
            built,
            self.descriptor.address_path(chain, index),
            index.value(),
            chain.is_change(),
        ))
    }

    pub fn next_address(&mut self, chain: Chain) -> Result<&AddressRecord> {
        let index = self.cursor.get(chain);
        let record = self.address_at(chain, index)?;
        self.cursor.advance(chain)?;
        self.addresses.push(record);
        Ok(&self.addresses[self.addresses.len() - 1])
    }

    pub fn mark_used(&mut self, address: &str) -> bool {
        mark_used(&mut self.addresses, address)
    }
}

/// Any account the wallet tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Account {
    SingleSig(SingleSigAccount),
    Multisig(MultisigAccount),
}

impl Account {
    pub fn name(&self) -> &str {
        match self {
            Account::SingleSig(a) => &a.name,
            Account::Multisig(a) => &a.descriptor.name,
        }
    }

    pub fn network(&self) -> Network {
        match self {
            Account::SingleSig(a) => a.network,
            Account::Multisig(a) => a.descriptor.network,
        }
    }

    pub fn next_address(&mut self, chain: Chain) -> Result<&AddressRecord> {
        match self {
            Account::SingleSig(a) => a.next_address(chain),
            Account::Multisig(a) => a.next_address(chain),
        }
    }

    pub fn addresses(&self) -> &[AddressRecord] {
        match self {
            Account::SingleSig(a) => &a.addresses,
            Account::Multisig(a) => &a.addresses,
        }
    }

    pub fn mark_used(&mut self, address: &str) -> bool {
        match self {
            Account::SingleSig(a) => a.mark_used(address),
            Account::Multisig(a) => a.mark_used(address),
        }
    }
}

fn mark_used(records: &mut [AddressRecord], address: &str) -> bool {
    match records.iter_mut().find(|r| r.address == address) {
        Some(record) => {
            record.mark_used();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnemonic::mnemonic_to_seed;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn master() -> MasterKey {
        MasterKey::from_seed(&mnemonic_to_seed(ABANDON, "").unwrap()).unwrap()
    }

    #[test]
    fn test_reference_first_addresses() {
        let m = master();
        let cases = [
            (SingleSigScheme::Legacy, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"),
            (SingleSigScheme::WrappedSegwit, "37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf"),
            (
                SingleSigScheme::NativeSegwit,
                "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu",
            ),
        ];
        for (scheme, expected) in cases {
            let mut account =
                SingleSigAccount::create(&m, "main", scheme, Network::Mainnet, 0u32).unwrap();
            let record = account.next_address(Chain::External).unwrap();
            assert_eq!(record.address, expected, "{:?}", scheme);
            assert_eq!(record.index, 0);
            assert!(!record.is_change);
        }
    }

    #[test]
    fn test_cursors_advance_per_chain() {
        let mut account = SingleSigAccount::create(
            &master(),
            "main",
            SingleSigScheme::NativeSegwit,
            Network::Testnet,
            0u32,
        )
        .unwrap();
        let first = account.next_address(Chain::External).unwrap().address.clone();
        let second = account.next_address(Chain::External).unwrap().address.clone();
        let change = account.next_address(Chain::Change).unwrap().clone();
        assert_ne!(first, second);
        assert_eq!(account.cursor.external.value(), 2);
        assert_eq!(account.cursor.change.value(), 1);
        assert_eq!(change.derivation_path().to_string_path(), "m/84'/1'/0'/1/0");
        assert!(change.is_change);
    }

    #[test]
    fn test_mark_used() {
        let mut account = Account::SingleSig(
            SingleSigAccount::create(
                &master(),
                "main",
                SingleSigScheme::Legacy,
                Network::Mainnet,
                0u32,
            )
            .unwrap(),
        );
        let address = account.next_address(Chain::External).unwrap().address.clone();
        assert!(account.mark_used(&address));
        assert!(account.addresses()[0].used());
        assert!(!account.mark_used("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"));
    }

    #[test]
    fn test_account_serde_tagged() {
        let account = Account::SingleSig(
            SingleSigAccount::create(
                &master(),
                "savings",
                SingleSigScheme::WrappedSegwit,
                Network::Testnet,
                1u32,
            )
            .unwrap(),
        );
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["kind"], "single-sig");
        assert_eq!(json["scheme"], "wrapped-segwit");
        let back: Account = serde_json::from_value(json).unwrap();
        assert_eq!(back, account);
    }
}
