//! Versioned wallet store
//!
//! Records live in a [`KeyValueStore`] under fixed keys. The wallet record
//! holds the encrypted seed plus public account data; contacts and
//! transaction notes live in their own records. From schema version 2 on,
//! contact and note payloads are encrypted under the key stretched from the
//! wallet password and the wallet seed's salt, so a single password unlock
//! opens everything.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use satchel_core::{
    decode_wif, detect_address_type, export_xpub, mnemonic_to_seed, single_sig_address,
    validate_mnemonic, Account, AddressRecord, Chain, IntoIndex, MasterKey,
    MultisigAccount, MultisigAccountDescriptor, MultisigConfig, MultisigVariant, Network,
    SingleSigAccount, SingleSigScheme, WalletSession, XpubExport,
};

use crate::config::VaultConfig;
use crate::envelope::{
    base64_bytes_vec, decrypt, decrypt_with_key, encrypt_with_key, reencrypt, DerivedKey,
    EncryptionEnvelope,
};
use crate::error::{Result, VaultError};
use crate::storage::KeyValueStore;

pub const WALLET_KEY: &str = "wallet";
pub const CONTACTS_KEY: &str = "contacts";
pub const TX_METADATA_KEY: &str = "tx_metadata";
pub const MIGRATION_BACKUP_KEY: &str = "migration_backup";

/// Staged copies written during a password change, promoted once the wallet
/// record carrying the new salt is saved
pub const CONTACTS_PENDING_KEY: &str = "contacts_pending";
pub const TX_METADATA_PENDING_KEY: &str = "tx_metadata_pending";

/// Schema with plaintext contacts and notes
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Schema written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Mnemonic and optional passphrase, as sealed inside the wallet record
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SeedSecret {
    mnemonic: String,
    #[serde(default)]
    passphrase: String,
}

/// User preferences kept in the wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletSettings {
    pub default_scheme: SingleSigScheme,
    pub auto_lock_minutes: u32,
    pub fiat_currency: String,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            default_scheme: SingleSigScheme::NativeSegwit,
            auto_lock_minutes: 15,
            fiat_currency: "USD".to_string(),
        }
    }
}

/// A standalone private key imported from WIF into an account slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedKey {
    /// Sealed WIF under its own salt at the export KDF tier
    pub encrypted_data: EncryptionEnvelope,
    #[serde(rename = "type")]
    pub scheme: SingleSigScheme,
    pub address: String,
    pub imported_at: DateTime<Utc>,
}

/// Top-level wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub version: u32,
    pub network: Network,
    pub encrypted_seed: EncryptionEnvelope,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub imported_keys: BTreeMap<u32, ImportedKey>,
    #[serde(default)]
    pub settings: WalletSettings,
    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    /// Salt shared by the seed envelope and every collection envelope
    pub fn master_salt(&self) -> &[u8] {
        &self.encrypted_seed.salt
    }

    /// Stretch `password` into the collection key, verifying it against the seed
    pub(crate) fn data_key(&self, password: &str) -> Result<DerivedKey> {
        if self.encrypted_seed.uses_shared_key() {
            return Err(VaultError::DecryptionFailed);
        }
        let key = DerivedKey::derive(
            password,
            &self.encrypted_seed.salt,
            self.encrypted_seed.iterations,
        )
        .map_err(|_| VaultError::DecryptionFailed)?;
        decrypt_with_key(&self.encrypted_seed, &key)?;
        Ok(key)
    }

    pub(crate) fn open_seed(&self, key: &DerivedKey) -> Result<SeedSecret> {
        let plaintext = decrypt_with_key(&self.encrypted_seed, key)?;
        serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionFailed)
    }

    fn require_current(&self) -> Result<()> {
        match self.version {
            CURRENT_SCHEMA_VERSION => Ok(()),
            other => Err(VaultError::UnsupportedVersion(other)),
        }
    }
}

/// Decrypted address book entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Caller input for adding or editing a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub address: String,
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ContactPayload {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Contact as persisted: sealed payload plus the fields needed to sort and
/// filter without decrypting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredContact {
    pub id: String,
    pub encrypted_data: EncryptionEnvelope,
    pub address_kind: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Schema 1 address book (plaintext)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyContactsRecord {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

/// Schema 2 address book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactsRecord {
    pub version: u32,
    /// Salt of the collection key the entries are sealed under
    #[serde(with = "base64_bytes_vec")]
    pub salt: Vec<u8>,
    #[serde(default)]
    pub contacts: Vec<StoredContact>,
}

/// Schema 1 transaction notes (plaintext, keyed by txid)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTxMetadataRecord {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

/// Schema 2 transaction notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxMetadataRecord {
    pub version: u32,
    /// Salt of the collection key the entries are sealed under
    #[serde(with = "base64_bytes_vec")]
    pub salt: Vec<u8>,
    #[serde(default)]
    pub entries: BTreeMap<String, EncryptionEnvelope>,
}

fn legacy_version() -> u32 {
    LEGACY_SCHEMA_VERSION
}

/// A schema 2 collection sealed under the wallet's collection key
///
/// `salt` names the key the record is sealed under. A record is only opened
/// when it matches the wallet's current salt.
pub(crate) trait SealedRecord: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const PENDING_KEY: &'static str;

    fn salt(&self) -> &[u8];
    fn set_salt(&mut self, salt: &[u8]);
    fn empty(salt: &[u8]) -> Self;
}

impl SealedRecord for ContactsRecord {
    const KEY: &'static str = CONTACTS_KEY;
    const PENDING_KEY: &'static str = CONTACTS_PENDING_KEY;

    fn salt(&self) -> &[u8] {
        &self.salt
    }

    fn set_salt(&mut self, salt: &[u8]) {
        self.salt = salt.to_vec();
    }

    fn empty(salt: &[u8]) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            salt: salt.to_vec(),
            contacts: Vec::new(),
        }
    }
}

impl SealedRecord for TxMetadataRecord {
    const KEY: &'static str = TX_METADATA_KEY;
    const PENDING_KEY: &'static str = TX_METADATA_PENDING_KEY;

    fn salt(&self) -> &[u8] {
        &self.salt
    }

    fn set_salt(&mut self, salt: &[u8]) {
        self.salt = salt.to_vec();
    }

    fn empty(salt: &[u8]) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            salt: salt.to_vec(),
            entries: BTreeMap::new(),
        }
    }
}

/// An unlocked wallet: the live master node plus the collection key
///
/// A session is bound to the salt it was unlocked under. Once the password
/// changes, or when it is handed to a different wallet, every operation
/// taking it fails with [`VaultError::SessionExpired`]. Dropping the session
/// drops both keys.
#[derive(Debug)]
pub struct VaultSession {
    wallet: WalletSession,
    data_key: DerivedKey,
}

impl VaultSession {
    pub fn wallet(&self) -> &WalletSession {
        &self.wallet
    }

    pub fn network(&self) -> Network {
        self.wallet.network()
    }

    pub fn master(&self) -> Result<&MasterKey> {
        Ok(self.wallet.master()?)
    }

    /// Collection key, if this session still belongs to `wallet`
    pub(crate) fn key_for(&self, wallet: &WalletRecord) -> Result<&DerivedKey> {
        if self.data_key.salt() != wallet.master_salt() {
            debug!("session salt does not match wallet");
            return Err(VaultError::SessionExpired);
        }
        Ok(&self.data_key)
    }

    /// Master node, if this session still belongs to `wallet`
    pub(crate) fn master_for(&self, wallet: &WalletRecord) -> Result<&MasterKey> {
        self.key_for(wallet)?;
        self.master()
    }

    /// Drop the master node and the collection key
    pub fn lock(mut self) {
        self.wallet.lock();
    }
}

/// Wallet vault over an arbitrary key-value store
pub struct Vault<S: KeyValueStore> {
    store: S,
    config: VaultConfig,
}

impl<S: KeyValueStore> Vault<S> {
    pub fn new(store: S, config: VaultConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn has_wallet(&self) -> Result<bool> {
        self.store.contains(WALLET_KEY)
    }

    /// Schema version of the stored wallet, if any
    pub fn schema_version(&self) -> Result<Option<u32>> {
        match self.store.get(WALLET_KEY)? {
            Some(bytes) => {
                #[derive(Deserialize)]
                struct Header {
                    version: u32,
                }
                let header: Header = serde_json::from_slice(&bytes)?;
                Ok(Some(header.version))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn write_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.store.set(key, &bytes)
    }

    pub(crate) fn load_wallet(&self) -> Result<WalletRecord> {
        let wallet: WalletRecord = self
            .read_json(WALLET_KEY)?
            .ok_or(VaultError::WalletNotFound)?;
        if wallet.version > CURRENT_SCHEMA_VERSION {
            return Err(VaultError::UnsupportedVersion(wallet.version));
        }
        Ok(wallet)
    }

    pub(crate) fn save_wallet(&mut self, wallet: &WalletRecord) -> Result<()> {
        self.write_json(WALLET_KEY, wallet)
    }

    /// Store a new wallet from an existing mnemonic
    #[instrument(skip(self, mnemonic, passphrase, password))]
    pub fn create_wallet(
        &mut self,
        network: Network,
        mnemonic: &str,
        passphrase: &str,
        password: &str,
    ) -> Result<()> {
        if self.has_wallet()? {
            return Err(VaultError::WalletExists);
        }
        if !validate_mnemonic(mnemonic) {
            return Err(satchel_core::Error::InvalidMnemonic.into());
        }

        let secret = SeedSecret {
            mnemonic: mnemonic.to_string(),
            passphrase: passphrase.to_string(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&secret)?);
        let key = DerivedKey::generate(password, self.config.kdf_iterations)?;
        let encrypted_seed = encrypt_with_key(&plaintext, &key)?.with_salt(key.salt());

        let wallet = WalletRecord {
            version: CURRENT_SCHEMA_VERSION,
            network,
            encrypted_seed,
            accounts: Vec::new(),
            imported_keys: BTreeMap::new(),
            settings: WalletSettings::default(),
            created_at: Utc::now(),
        };
        self.save_wallet(&wallet)?;
        info!(%network, "wallet created");
        Ok(())
    }

    /// Generate a fresh mnemonic, store it, and hand it back once for backup
    pub fn generate_wallet(
        &mut self,
        network: Network,
        strength_bits: u32,
        password: &str,
    ) -> Result<Zeroizing<String>> {
        let mnemonic = satchel_core::generate_mnemonic(strength_bits)?;
        self.create_wallet(network, &mnemonic, "", password)?;
        Ok(mnemonic)
    }

    /// Verify `password` and load the master node
    #[instrument(skip_all)]
    pub fn unlock(&self, password: &str) -> Result<VaultSession> {
        let wallet = self.load_wallet()?;
        let data_key = wallet.data_key(password)?;
        let secret = wallet.open_seed(&data_key)?;
        let seed = mnemonic_to_seed(&secret.mnemonic, &secret.passphrase)?;

        let mut session = WalletSession::new(wallet.network);
        session.unlock(&seed)?;
        debug!("vault unlocked");
        Ok(VaultSession {
            wallet: session,
            data_key,
        })
    }

    pub fn reveal_mnemonic(&self, password: &str) -> Result<Zeroizing<String>> {
        let wallet = self.load_wallet()?;
        let key = wallet.data_key(password)?;
        let secret = wallet.open_seed(&key)?;
        Ok(Zeroizing::new(secret.mnemonic.clone()))
    }

    pub fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.load_wallet()?.accounts)
    }

    /// Derive and persist a BIP44/49/84 account; returns its position
    pub fn add_single_sig_account(
        &mut self,
        session: &VaultSession,
        name: &str,
        scheme: SingleSigScheme,
        account: impl IntoIndex,
    ) -> Result<usize> {
        let mut wallet = self.load_wallet()?;
        let created = SingleSigAccount::create(
            session.master_for(&wallet)?,
            name,
            scheme,
            wallet.network,
            account,
        )?;
        let duplicate = wallet.accounts.iter().any(|a| match a {
            Account::SingleSig(existing) => existing.xpub == created.xpub,
            Account::Multisig(_) => false,
        });
        if duplicate {
            return Err(VaultError::InvalidParameter(format!(
                "account {} already exists",
                created.path()
            )));
        }
        wallet.accounts.push(Account::SingleSig(created));
        self.save_wallet(&wallet)?;
        info!(name, ?scheme, "added single-sig account");
        Ok(wallet.accounts.len() - 1)
    }

    /// Export this wallet's BIP48 xpub for a multisig setup
    pub fn export_multisig_xpub(
        &self,
        session: &VaultSession,
        config: MultisigConfig,
        variant: MultisigVariant,
        account: impl IntoIndex,
    ) -> Result<XpubExport> {
        let wallet = self.load_wallet()?;
        Ok(export_xpub(
            session.master_for(&wallet)?,
            config,
            variant,
            account,
            wallet.network,
        )?)
    }

    /// Persist a multisig account whose own cosigner belongs to this wallet
    pub fn add_multisig_account(
        &mut self,
        session: &VaultSession,
        descriptor: MultisigAccountDescriptor,
    ) -> Result<usize> {
        let mut wallet = self.load_wallet()?;
        if descriptor.network != wallet.network {
            return Err(satchel_core::Error::NetworkMismatch {
                expected: wallet.network,
            }
            .into());
        }
        let own = export_xpub(
            session.master_for(&wallet)?,
            descriptor.config,
            descriptor.variant,
            descriptor.account_index,
            wallet.network,
        )?;
        let matches_self = descriptor
            .self_cosigner()
            .map(|c| c.xpub == own.xpub)
            .unwrap_or(false);
        if !matches_self {
            return Err(VaultError::InvalidParameter(
                "multisig account does not include this wallet's key".to_string(),
            ));
        }

        let name = descriptor.name.clone();
        wallet
            .accounts
            .push(Account::Multisig(MultisigAccount::new(descriptor)));
        self.save_wallet(&wallet)?;
        info!(name = %name, "added multisig account");
        Ok(wallet.accounts.len() - 1)
    }

    /// Derive the next address on `chain` and persist the advanced cursor
    pub fn next_address(&mut self, account: usize, chain: Chain) -> Result<AddressRecord> {
        let mut wallet = self.load_wallet()?;
        let record = wallet
            .accounts
            .get_mut(account)
            .ok_or_else(|| VaultError::NotFound(format!("account {}", account)))?
            .next_address(chain)?
            .clone();
        self.save_wallet(&wallet)?;
        debug!(account, address = %record.address, "issued address");
        Ok(record)
    }

    /// Flag an issued address as used; `false` if no account issued it
    pub fn mark_address_used(&mut self, address: &str) -> Result<bool> {
        let mut wallet = self.load_wallet()?;
        let found = wallet.accounts.iter_mut().any(|a| a.mark_used(address));
        if found {
            self.save_wallet(&wallet)?;
        }
        Ok(found)
    }

    /// Import a WIF key into `slot`, sealed under the export KDF tier
    #[instrument(skip(self, wif, password))]
    pub fn import_wif(
        &mut self,
        slot: u32,
        wif: &str,
        scheme: SingleSigScheme,
        password: &str,
    ) -> Result<String> {
        let mut wallet = self.load_wallet()?;
        wallet.data_key(password)?;
        if wallet.imported_keys.contains_key(&slot) {
            return Err(VaultError::InvalidParameter(format!(
                "slot {} already holds an imported key",
                slot
            )));
        }

        let decoded = decode_wif(wif, wallet.network)?;
        let built = single_sig_address(&decoded.public_key()?, scheme, wallet.network)?;
        let key = DerivedKey::generate(password, self.config.export_kdf_iterations)?;
        let encrypted_data = encrypt_with_key(wif.as_bytes(), &key)?.with_salt(key.salt());

        wallet.imported_keys.insert(
            slot,
            ImportedKey {
                encrypted_data,
                scheme,
                address: built.address.clone(),
                imported_at: Utc::now(),
            },
        );
        self.save_wallet(&wallet)?;
        info!(slot, address = %built.address, "imported key");
        Ok(built.address)
    }

    pub fn reveal_imported_key(&self, slot: u32, password: &str) -> Result<Zeroizing<String>> {
        let wallet = self.load_wallet()?;
        let imported = wallet
            .imported_keys
            .get(&slot)
            .ok_or_else(|| VaultError::NotFound(format!("imported key {}", slot)))?;
        let plaintext = decrypt(&imported.encrypted_data, password)?;
        let wif = std::str::from_utf8(&plaintext).map_err(|_| VaultError::DecryptionFailed)?;
        Ok(Zeroizing::new(wif.to_string()))
    }

    pub fn remove_imported_key(&mut self, slot: u32) -> Result<()> {
        let mut wallet = self.load_wallet()?;
        if wallet.imported_keys.remove(&slot).is_none() {
            return Err(VaultError::NotFound(format!("imported key {}", slot)));
        }
        self.save_wallet(&wallet)
    }

    pub fn settings(&self) -> Result<WalletSettings> {
        Ok(self.load_wallet()?.settings)
    }

    pub fn update_settings(&mut self, settings: WalletSettings) -> Result<()> {
        let mut wallet = self.load_wallet()?;
        wallet.settings = settings;
        self.save_wallet(&wallet)
    }

    /// Read a sealed collection, if one is stored
    ///
    /// A staged copy whose salt matches the wallet belongs to a password
    /// change that committed before its records were promoted, so it wins.
    fn read_sealed<T: SealedRecord>(&self, wallet: &WalletRecord) -> Result<Option<T>> {
        wallet.require_current()?;
        if let Some(pending) = self.read_json::<T>(T::PENDING_KEY)? {
            if pending.salt() == wallet.master_salt() {
                return Ok(Some(pending));
            }
        }
        match self.read_json::<T>(T::KEY)? {
            Some(record) if record.salt() != wallet.master_salt() => {
                warn!(key = T::KEY, "record sealed under a salt the wallet no longer holds");
                Err(VaultError::DecryptionFailed)
            }
            other => Ok(other),
        }
    }

    fn load_sealed<T: SealedRecord>(&self, wallet: &WalletRecord) -> Result<T> {
        Ok(self
            .read_sealed(wallet)?
            .unwrap_or_else(|| T::empty(wallet.master_salt())))
    }

    /// Write a sealed collection and drop any staged copy it supersedes
    pub(crate) fn save_sealed<T: SealedRecord>(&mut self, record: &T) -> Result<()> {
        self.write_json(T::KEY, record)?;
        self.store.remove(T::PENDING_KEY)
    }

    /// Move a staged record into place after a committed password change
    fn promote<T: SealedRecord>(&mut self, record: &T) {
        if let Err(e) = self.save_sealed(record) {
            warn!(key = T::KEY, error = %e, "staged record left for the next write");
        }
    }

    fn discard_pending(&mut self) {
        for key in [CONTACTS_PENDING_KEY, TX_METADATA_PENDING_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "could not remove staged record");
            }
        }
    }

    fn seal_contact(
        &self,
        wallet: &WalletRecord,
        key: &DerivedKey,
        contact: &NewContact,
    ) -> Result<(EncryptionEnvelope, String)> {
        if contact.name.trim().is_empty() {
            return Err(VaultError::InvalidParameter(
                "contact name must not be empty".to_string(),
            ));
        }
        let kind = detect_address_type(&contact.address, wallet.network)?;
        let payload = ContactPayload {
            name: contact.name.clone(),
            address: contact.address.clone(),
            notes: contact.notes.clone(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        Ok((
            encrypt_with_key(&plaintext, key)?,
            kind.as_str().to_string(),
        ))
    }

    /// Add a contact; returns its id
    pub fn add_contact(&mut self, session: &VaultSession, contact: NewContact) -> Result<String> {
        let wallet = self.load_wallet()?;
        let key = session.key_for(&wallet)?;
        let mut record: ContactsRecord = self.load_sealed(&wallet)?;
        let (encrypted_data, address_kind) = self.seal_contact(&wallet, key, &contact)?;

        let id = uuid::Uuid::new_v4().to_string();
        record.contacts.push(StoredContact {
            id: id.clone(),
            encrypted_data,
            address_kind,
            created_at: Utc::now(),
            updated_at: None,
        });
        self.save_sealed(&record)?;
        debug!(id = %id, "contact added");
        Ok(id)
    }

    /// Decrypt the whole address book
    pub fn contacts(&self, session: &VaultSession) -> Result<Vec<Contact>> {
        let wallet = self.load_wallet()?;
        let key = session.key_for(&wallet)?;
        let record: ContactsRecord = self.load_sealed(&wallet)?;
        record
            .contacts
            .iter()
            .map(|stored| {
                let plaintext = decrypt_with_key(&stored.encrypted_data, key)?;
                let payload: ContactPayload = serde_json::from_slice(&plaintext)
                    .map_err(|_| VaultError::DecryptionFailed)?;
                Ok(Contact {
                    id: stored.id.clone(),
                    name: payload.name,
                    address: payload.address,
                    notes: payload.notes,
                    created_at: stored.created_at,
                    updated_at: stored.updated_at,
                })
            })
            .collect()
    }

    pub fn update_contact(
        &mut self,
        session: &VaultSession,
        id: &str,
        contact: NewContact,
    ) -> Result<()> {
        let wallet = self.load_wallet()?;
        let key = session.key_for(&wallet)?;
        let mut record: ContactsRecord = self.load_sealed(&wallet)?;
        let (encrypted_data, address_kind) = self.seal_contact(&wallet, key, &contact)?;
        let stored = record
            .contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| VaultError::NotFound(format!("contact {}", id)))?;
        stored.encrypted_data = encrypted_data;
        stored.address_kind = address_kind;
        stored.updated_at = Some(Utc::now());
        self.save_sealed(&record)
    }

    pub fn delete_contact(&mut self, id: &str) -> Result<()> {
        let wallet = self.load_wallet()?;
        let mut record: ContactsRecord = self.load_sealed(&wallet)?;
        let before = record.contacts.len();
        record.contacts.retain(|c| c.id != id);
        if record.contacts.len() == before {
            return Err(VaultError::NotFound(format!("contact {}", id)));
        }
        self.save_sealed(&record)
    }

    /// Attach a note to `txid`; an empty note removes it
    pub fn set_tx_note(&mut self, session: &VaultSession, txid: &str, note: &str) -> Result<()> {
        let wallet = self.load_wallet()?;
        let key = session.key_for(&wallet)?;
        let mut record: TxMetadataRecord = self.load_sealed(&wallet)?;
        if note.is_empty() {
            record.entries.remove(txid);
        } else {
            let envelope = encrypt_with_key(note.as_bytes(), key)?;
            record.entries.insert(txid.to_string(), envelope);
        }
        self.save_sealed(&record)
    }

    pub fn tx_note(&self, session: &VaultSession, txid: &str) -> Result<Option<String>> {
        let wallet = self.load_wallet()?;
        let key = session.key_for(&wallet)?;
        let record: TxMetadataRecord = self.load_sealed(&wallet)?;
        match record.entries.get(txid) {
            Some(envelope) => {
                let plaintext = decrypt_with_key(envelope, key)?;
                let note = String::from_utf8(plaintext.to_vec())
                    .map_err(|_| VaultError::DecryptionFailed)?;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    /// Re-encrypt every sealed record under `new_password`
    ///
    /// Re-sealed collections are staged under their pending keys first. Saving
    /// the wallet record with the new salt is the commit point; the staged
    /// copies are promoted afterwards. A crash before the commit leaves staged
    /// copies whose salt matches nothing, and they are ignored. A crash after
    /// it leaves staged copies that later reads pick up. Sessions unlocked
    /// under the old password expire.
    #[instrument(skip_all)]
    pub fn change_password(&mut self, old_password: &str, new_password: &str) -> Result<()> {
        let mut wallet = self.load_wallet()?;
        let old_key = wallet.data_key(old_password)?;
        let new_key = DerivedKey::generate(new_password, self.config.kdf_iterations)?;

        let mut contacts: Option<ContactsRecord> = None;
        let mut tx_metadata: Option<TxMetadataRecord> = None;
        if wallet.version == CURRENT_SCHEMA_VERSION {
            if let Some(mut record) = self.read_sealed::<ContactsRecord>(&wallet)? {
                for stored in &mut record.contacts {
                    let plaintext = decrypt_with_key(&stored.encrypted_data, &old_key)?;
                    stored.encrypted_data = encrypt_with_key(&plaintext, &new_key)?;
                }
                record.set_salt(new_key.salt());
                contacts = Some(record);
            }
            if let Some(mut record) = self.read_sealed::<TxMetadataRecord>(&wallet)? {
                for envelope in record.entries.values_mut() {
                    let plaintext = decrypt_with_key(envelope, &old_key)?;
                    *envelope = encrypt_with_key(&plaintext, &new_key)?;
                }
                record.set_salt(new_key.salt());
                tx_metadata = Some(record);
            }
        }

        let seed = decrypt_with_key(&wallet.encrypted_seed, &old_key)?;
        wallet.encrypted_seed = encrypt_with_key(&seed, &new_key)?.with_salt(new_key.salt());

        for imported in wallet.imported_keys.values_mut() {
            imported.encrypted_data = reencrypt(
                &imported.encrypted_data,
                old_password,
                new_password,
                self.config.export_kdf_iterations,
            )?;
        }

        let committed = (|| -> Result<()> {
            if let Some(record) = &contacts {
                self.write_json(CONTACTS_PENDING_KEY, record)?;
            }
            if let Some(record) = &tx_metadata {
                self.write_json(TX_METADATA_PENDING_KEY, record)?;
            }
            self.save_wallet(&wallet)
        })();
        if let Err(e) = committed {
            warn!(error = %e, "password change not committed; discarding staged records");
            self.discard_pending();
            return Err(e);
        }

        if let Some(record) = &contacts {
            self.promote(record);
        }
        if let Some(record) = &tx_metadata {
            self.promote(record);
        }
        info!("password changed");
        Ok(())
    }
}

/// Raw bytes of every wallet record, for restoring after a failed rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub wallet: Option<Vec<u8>>,
    pub contacts: Option<Vec<u8>>,
    pub tx_metadata: Option<Vec<u8>>,
}

impl Snapshot {
    pub fn take<S: KeyValueStore>(store: &S) -> Result<Self> {
        Ok(Self {
            wallet: store.get(WALLET_KEY)?,
            contacts: store.get(CONTACTS_KEY)?,
            tx_metadata: store.get(TX_METADATA_KEY)?,
        })
    }

    /// Write changed records back; records absent at snapshot time are removed
    pub fn restore<S: KeyValueStore>(&self, store: &mut S) -> Result<()> {
        for (key, bytes) in [
            (WALLET_KEY, &self.wallet),
            (CONTACTS_KEY, &self.contacts),
            (TX_METADATA_KEY, &self.tx_metadata),
        ] {
            if store.get(key)? == *bytes {
                continue;
            }
            match bytes {
                Some(bytes) => store.set(key, bytes)?,
                None => store.remove(key)?,
            }
        }
        Ok(())
    }
}
