//! Schema 1 to schema 2 migration
//!
//! Schema 1 kept contacts and transaction notes in plaintext. Migration
//! encrypts both under the wallet's collection key and bumps the wallet
//! record's version. The sequence is:
//!
//! 1. Verify the password (nothing is touched on failure)
//! 2. Snapshot the raw bytes of every record into a backup record
//! 3. Seal contacts and notes in memory
//! 4. Decrypt everything again and compare against the source
//! 5. Write the collections, then flip the wallet version last
//!
//! Any failure after the backup exists restores it. A committed migration
//! can be undone with [`Vault::rollback_migration`] until the backup ages
//! out of the configured window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use satchel_core::detect_address_type;

use crate::envelope::{base64_bytes_vec, decrypt_with_key, encrypt_with_key, DerivedKey};
use crate::error::{Result, VaultError};
use crate::storage::KeyValueStore;
use crate::store::{
    ContactPayload, ContactsRecord, LegacyContactsRecord, LegacyTxMetadataRecord, Snapshot,
    StoredContact, TxMetadataRecord, Vault, WalletRecord, CONTACTS_KEY, CURRENT_SCHEMA_VERSION,
    LEGACY_SCHEMA_VERSION, MIGRATION_BACKUP_KEY, TX_METADATA_KEY,
};

/// Address kind recorded for legacy contacts whose address no longer parses
const UNKNOWN_ADDRESS_KIND: &str = "unknown";

/// Migration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    Unmigrated,
    BackedUp,
    Migrating,
    Verified,
    Committed,
    RolledBack,
}

impl MigrationState {
    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn advance(self, next: MigrationState) -> Result<MigrationState> {
        use MigrationState::*;
        let allowed = matches!(
            (self, next),
            (Unmigrated, BackedUp)
                | (BackedUp, Migrating)
                | (Migrating, Verified)
                | (Verified, Committed)
                | (BackedUp | Migrating | Verified | Committed, RolledBack)
        );
        if !allowed {
            return Err(VaultError::MigrationFailed {
                reason: format!("illegal transition {:?} -> {:?}", self, next),
                rolled_back: false,
            });
        }
        debug!(from = ?self, to = ?next, "migration state");
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationState::Committed | MigrationState::RolledBack)
    }
}

/// Raw pre-migration records, kept for rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationBackup {
    pub created_at: DateTime<Utc>,
    pub from_version: u32,
    #[serde(with = "base64_bytes_vec")]
    pub wallet: Vec<u8>,
    #[serde(default, with = "base64_bytes_opt")]
    pub contacts: Option<Vec<u8>>,
    #[serde(default, with = "base64_bytes_opt")]
    pub tx_metadata: Option<Vec<u8>>,
}

impl MigrationBackup {
    fn from_snapshot(snapshot: Snapshot, from_version: u32) -> Result<Self> {
        let wallet = snapshot.wallet.ok_or(VaultError::WalletNotFound)?;
        Ok(Self {
            created_at: Utc::now(),
            from_version,
            wallet,
            contacts: snapshot.contacts,
            tx_metadata: snapshot.tx_metadata,
        })
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            wallet: Some(self.wallet.clone()),
            contacts: self.contacts.clone(),
            tx_metadata: self.tx_metadata.clone(),
        }
    }

    /// Last moment a rollback is accepted
    pub fn expires_at(&self, window: chrono::Duration) -> DateTime<Utc> {
        self.created_at + window
    }
}

/// Outcome of [`Vault::migrate_v1_to_v2`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub state: MigrationState,
    /// The store was already at the current schema; nothing was written
    pub already_current: bool,
    pub contacts_migrated: usize,
    pub notes_migrated: usize,
}

/// Where the store stands with respect to migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub schema_version: Option<u32>,
    pub state: MigrationState,
    pub backup_created_at: Option<DateTime<Utc>>,
    pub rollback_deadline: Option<DateTime<Utc>>,
    pub rollback_available: bool,
}

struct Sealed {
    contacts: ContactsRecord,
    tx_metadata: TxMetadataRecord,
}

fn seal_collections(
    wallet: &WalletRecord,
    key: &DerivedKey,
    contacts: &LegacyContactsRecord,
    notes: &LegacyTxMetadataRecord,
) -> Result<Sealed> {
    let mut sealed_contacts = Vec::with_capacity(contacts.contacts.len());
    for contact in &contacts.contacts {
        let payload = ContactPayload {
            name: contact.name.clone(),
            address: contact.address.clone(),
            notes: contact.notes.clone(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        let address_kind = detect_address_type(&contact.address, wallet.network)
            .map(|kind| kind.as_str())
            .unwrap_or(UNKNOWN_ADDRESS_KIND);
        sealed_contacts.push(StoredContact {
            id: contact.id.clone(),
            encrypted_data: encrypt_with_key(&plaintext, key)?,
            address_kind: address_kind.to_string(),
            created_at: contact.created_at,
            updated_at: contact.updated_at,
        });
    }

    let mut entries = BTreeMap::new();
    for (txid, note) in notes.notes.iter().filter(|(_, note)| !note.is_empty()) {
        entries.insert(txid.clone(), encrypt_with_key(note.as_bytes(), key)?);
    }

    Ok(Sealed {
        contacts: ContactsRecord {
            version: CURRENT_SCHEMA_VERSION,
            salt: wallet.master_salt().to_vec(),
            contacts: sealed_contacts,
        },
        tx_metadata: TxMetadataRecord {
            version: CURRENT_SCHEMA_VERSION,
            salt: wallet.master_salt().to_vec(),
            entries,
        },
    })
}

/// Decrypt every sealed item and compare with its plaintext source
fn verify_sealed(
    sealed: &Sealed,
    key: &DerivedKey,
    contacts: &LegacyContactsRecord,
    notes: &LegacyTxMetadataRecord,
) -> Result<()> {
    let mismatch = |what: &str| VaultError::MigrationFailed {
        reason: format!("verification failed for {}", what),
        rolled_back: false,
    };

    if sealed.contacts.contacts.len() != contacts.contacts.len() {
        return Err(mismatch("contact count"));
    }
    for (stored, source) in sealed.contacts.contacts.iter().zip(&contacts.contacts) {
        let plaintext = decrypt_with_key(&stored.encrypted_data, key)?;
        let payload: ContactPayload = serde_json::from_slice(&plaintext)?;
        if stored.id != source.id
            || payload.name != source.name
            || payload.address != source.address
            || payload.notes != source.notes
        {
            return Err(mismatch("contact"));
        }
    }

    let source_txids = notes
        .notes
        .iter()
        .filter(|(_, note)| !note.is_empty())
        .map(|(txid, _)| txid);
    if !sealed.tx_metadata.entries.keys().eq(source_txids) {
        return Err(mismatch("transaction note set"));
    }
    for (txid, envelope) in &sealed.tx_metadata.entries {
        let plaintext = decrypt_with_key(envelope, key)?;
        if notes.notes.get(txid).map(String::as_bytes) != Some(plaintext.as_slice()) {
            return Err(mismatch("transaction note"));
        }
    }
    Ok(())
}

impl<S: KeyValueStore> Vault<S> {
    /// Upgrade a schema 1 store in place
    #[instrument(skip_all)]
    pub fn migrate_v1_to_v2(&mut self, password: &str) -> Result<MigrationReport> {
        let mut wallet = self.load_wallet()?;
        match wallet.version {
            CURRENT_SCHEMA_VERSION => {
                info!("store already at current schema");
                return Ok(MigrationReport {
                    state: MigrationState::Committed,
                    already_current: true,
                    contacts_migrated: 0,
                    notes_migrated: 0,
                });
            }
            LEGACY_SCHEMA_VERSION => {}
            other => return Err(VaultError::UnsupportedVersion(other)),
        }

        let key = wallet.data_key(password)?;
        let mut state = MigrationState::Unmigrated;

        let snapshot = Snapshot::take(self.store())?;
        let backup = MigrationBackup::from_snapshot(snapshot.clone(), wallet.version)?;
        if let Err(e) = self.write_json(MIGRATION_BACKUP_KEY, &backup) {
            error!(error = %e, "could not write migration backup");
            return Err(VaultError::MigrationFailed {
                reason: format!("backup failed: {}", e),
                rolled_back: false,
            });
        }
        state = state.advance(MigrationState::BackedUp)?;
        info!("migration backup written");

        let outcome = (|| -> Result<(usize, usize)> {
            state = state.advance(MigrationState::Migrating)?;
            let contacts: LegacyContactsRecord =
                self.read_json(CONTACTS_KEY)?.unwrap_or_default();
            let notes: LegacyTxMetadataRecord =
                self.read_json(TX_METADATA_KEY)?.unwrap_or_default();
            let sealed = seal_collections(&wallet, &key, &contacts, &notes)?;

            verify_sealed(&sealed, &key, &contacts, &notes)?;
            state = state.advance(MigrationState::Verified)?;

            self.save_sealed(&sealed.contacts)?;
            self.save_sealed(&sealed.tx_metadata)?;
            wallet.version = CURRENT_SCHEMA_VERSION;
            self.save_wallet(&wallet)?;
            state = state.advance(MigrationState::Committed)?;
            Ok((
                sealed.contacts.contacts.len(),
                sealed.tx_metadata.entries.len(),
            ))
        })();

        match outcome {
            Ok((contacts_migrated, notes_migrated)) => {
                info!(contacts_migrated, notes_migrated, "migration committed");
                Ok(MigrationReport {
                    state,
                    already_current: false,
                    contacts_migrated,
                    notes_migrated,
                })
            }
            Err(e) => {
                warn!(error = %e, ?state, "migration failed; restoring backup");
                let rolled_back = snapshot.restore(self.store_mut()).is_ok()
                    && self.store_mut().remove(MIGRATION_BACKUP_KEY).is_ok();
                if !rolled_back {
                    error!("backup restore failed; backup record left in place");
                }
                Err(VaultError::MigrationFailed {
                    reason: e.to_string(),
                    rolled_back,
                })
            }
        }
    }

    fn load_backup(&self) -> Result<Option<MigrationBackup>> {
        self.read_json(MIGRATION_BACKUP_KEY)
    }

    /// Restore the pre-migration records byte for byte
    #[instrument(skip(self))]
    pub fn rollback_migration(&mut self) -> Result<MigrationState> {
        let backup = self.load_backup()?.ok_or(VaultError::NoBackup)?;
        let expires_at = backup.expires_at(self.config().rollback_window());
        let now = Utc::now();
        if now > expires_at {
            return Err(VaultError::BackupExpired {
                days: (now - expires_at).num_days(),
            });
        }

        backup.snapshot().restore(self.store_mut())?;
        self.store_mut().remove(MIGRATION_BACKUP_KEY)?;
        info!(from_version = backup.from_version, "migration rolled back");
        MigrationState::Committed.advance(MigrationState::RolledBack)
    }

    /// Drop a backup older than the rollback window; `true` if one was removed
    pub fn purge_expired_backup(&mut self) -> Result<bool> {
        let Some(backup) = self.load_backup()? else {
            return Ok(false);
        };
        if Utc::now() <= backup.expires_at(self.config().rollback_window()) {
            return Ok(false);
        }
        self.store_mut().remove(MIGRATION_BACKUP_KEY)?;
        info!("expired migration backup purged");
        Ok(true)
    }

    pub fn migration_status(&self) -> Result<MigrationStatus> {
        let schema_version = self.schema_version()?;
        let backup = self.load_backup()?;
        let deadline = backup
            .as_ref()
            .map(|b| b.expires_at(self.config().rollback_window()));
        let state = match schema_version {
            Some(CURRENT_SCHEMA_VERSION) => MigrationState::Committed,
            _ => MigrationState::Unmigrated,
        };
        Ok(MigrationStatus {
            schema_version,
            state,
            backup_created_at: backup.as_ref().map(|b| b.created_at),
            rollback_deadline: deadline,
            rollback_available: deadline.map(|d| Utc::now() <= d).unwrap_or(false),
        })
    }
}

mod base64_bytes_opt {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => {
                serializer.serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(&s)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
