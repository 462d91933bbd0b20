//! End-to-end workflow tests for Satchel
//!
//! These tests drive the core library and the vault together: wallet
//! creation, account and multisig setup, encrypted records, and schema
//! migration on a real directory.

use satchel_core::{
    create_multisig_account, decode_wif, entropy_to_mnemonic, export_xpub, generate_mnemonic,
    mnemonic_to_seed, private_key_to_wif, validate_xpub, Chain, CosignerInput, Error,
    MasterKey, MultisigConfig, MultisigVariant, Network, SingleSigAccount, SingleSigScheme,
    XpubExport,
};
use satchel_vault::{
    decrypt, encrypt_with_password, FileStore, KeyValueStore, MigrationState, NewContact, Vault,
    VaultConfig, VaultError, WalletRecord, LEGACY_SCHEMA_VERSION, WALLET_KEY,
};

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn vault_at(dir: &std::path::Path) -> Vault<FileStore> {
    let config = VaultConfig {
        data_dir: dir.join("satchel"),
        kdf_iterations: 100_000,
        export_kdf_iterations: 100_000,
        ..VaultConfig::default()
    };
    config.ensure_directories().unwrap();
    let store = FileStore::new(config.data_dir.clone()).unwrap();
    Vault::new(store, config).unwrap()
}

fn fresh_master() -> MasterKey {
    let phrase = generate_mnemonic(128).unwrap();
    MasterKey::from_seed(&mnemonic_to_seed(&phrase, "").unwrap()).unwrap()
}

fn as_cosigner(name: &str, export: &XpubExport) -> CosignerInput {
    CosignerInput {
        name: name.to_string(),
        xpub: export.xpub.clone(),
        fingerprint: export.fingerprint,
    }
}

#[test]
fn test_zero_entropy_mnemonic_and_seed() {
    init_tracing();
    let phrase = entropy_to_mnemonic(&[0u8; 16]).unwrap();
    assert_eq!(phrase.as_str(), ABANDON);

    let seed = mnemonic_to_seed(&phrase, "").unwrap();
    let seed_hex = hex::encode(seed.as_bytes());
    assert!(seed_hex.starts_with("5eb00bbd"));
    assert!(seed_hex.ends_with("e38e4"));
    assert_eq!(
        seed_hex,
        "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1\
         9a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
    );
}

#[test]
fn test_two_of_three_p2wsh_across_participants() {
    init_tracing();
    let config = MultisigConfig::TwoOfThree;
    let variant = MultisigVariant::P2wsh;
    let network = Network::Testnet;

    // Three independently generated signers
    let masters = [fresh_master(), fresh_master(), fresh_master()];
    let exports: Vec<XpubExport> = masters
        .iter()
        .map(|m| export_xpub(m, config, variant, 0u32, network).unwrap())
        .collect();

    for export in &exports {
        let validation = validate_xpub(&export.xpub, config, variant, network);
        assert!(validation.valid, "{:?}", validation.errors);
    }

    let alice = create_multisig_account(
        "Treasury",
        &exports[0],
        &[as_cosigner("Bob", &exports[1]), as_cosigner("Carol", &exports[2])],
    )
    .unwrap();
    let alice_swapped = create_multisig_account(
        "Treasury",
        &exports[0],
        &[as_cosigner("Carol", &exports[2]), as_cosigner("Bob", &exports[1])],
    )
    .unwrap();
    let carol = create_multisig_account(
        "Treasury",
        &exports[2],
        &[as_cosigner("Bob", &exports[1]), as_cosigner("Alice", &exports[0])],
    )
    .unwrap();

    for index in 0u32..3 {
        let expected = alice.address_at(Chain::External, index).unwrap();
        assert!(expected.address.starts_with("tb1q"));
        assert!(expected.witness_script.is_some());
        assert_eq!(
            alice_swapped.address_at(Chain::External, index).unwrap().address,
            expected.address
        );
        assert_eq!(
            carol.address_at(Chain::External, index).unwrap().address,
            expected.address
        );
    }
    assert_ne!(
        alice.address_at(Chain::External, 0u32).unwrap().address,
        alice.address_at(Chain::Change, 0u32).unwrap().address
    );
}

#[test]
fn test_wrong_password_fails_decryption() {
    init_tracing();
    let envelope = encrypt_with_password(b"hello", "p1", 100_000).unwrap();
    assert!(matches!(
        decrypt(&envelope, "p2"),
        Err(VaultError::DecryptionFailed)
    ));
    assert_eq!(&decrypt(&envelope, "p1").unwrap()[..], b"hello");
}

#[test]
fn test_testnet_wif_rejected_on_mainnet() {
    init_tracing();
    let mut key = [0u8; 32];
    key[31] = 42;
    let wif = private_key_to_wif(&key, Network::Testnet, true).unwrap();
    assert!(wif.starts_with('c'));
    assert_eq!(
        decode_wif(&wif, Network::Mainnet).unwrap_err(),
        Error::NetworkMismatch {
            expected: Network::Mainnet
        }
    );

    let dir = tempfile::tempdir().unwrap();
    let mut vault = vault_at(dir.path());
    vault
        .create_wallet(Network::Mainnet, ABANDON, "", "pw")
        .unwrap();
    assert!(matches!(
        vault.import_wif(0, &wif, SingleSigScheme::NativeSegwit, "pw"),
        Err(VaultError::Core(Error::NetworkMismatch { .. }))
    ));
}

#[test]
fn test_bad_account_index_rejected_before_derivation() {
    init_tracing();
    let master = MasterKey::from_seed(&mnemonic_to_seed(ABANDON, "").unwrap()).unwrap();
    let scheme = SingleSigScheme::NativeSegwit;

    assert!(matches!(
        SingleSigAccount::create(&master, "neg", scheme, Network::Mainnet, -1i32),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        SingleSigAccount::create(&master, "frac", scheme, Network::Mainnet, 1.5f64),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        export_xpub(
            &master,
            MultisigConfig::TwoOfThree,
            MultisigVariant::P2wsh,
            -1i64,
            Network::Mainnet
        ),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn test_full_wallet_lifecycle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut vault = vault_at(dir.path());

    let phrase = vault.generate_wallet(Network::Testnet, 256, "first").unwrap();
    assert_eq!(phrase.split_whitespace().count(), 24);

    let session = vault.unlock("first").unwrap();
    let segwit = vault
        .add_single_sig_account(&session, "Spending", SingleSigScheme::NativeSegwit, 0u32)
        .unwrap();
    let wrapped = vault
        .add_single_sig_account(&session, "Legacy-ish", SingleSigScheme::WrappedSegwit, 0u32)
        .unwrap();
    assert!(vault
        .next_address(segwit, Chain::External)
        .unwrap()
        .address
        .starts_with("tb1q"));
    assert!(vault
        .next_address(wrapped, Chain::Change)
        .unwrap()
        .address
        .starts_with('2'));

    // 2-of-2 with an outside signer, held in the vault
    let ours = vault
        .export_multisig_xpub(&session, MultisigConfig::TwoOfTwo, MultisigVariant::P2shP2wsh, 0u32)
        .unwrap();
    let theirs = export_xpub(
        &fresh_master(),
        MultisigConfig::TwoOfTwo,
        MultisigVariant::P2shP2wsh,
        0u32,
        Network::Testnet,
    )
    .unwrap();
    let descriptor =
        create_multisig_account("Joint", &ours, &[as_cosigner("Partner", &theirs)]).unwrap();
    let expected = descriptor.address_at(Chain::External, 0u32).unwrap().address;
    let joint = vault.add_multisig_account(&session, descriptor).unwrap();
    assert_eq!(
        vault.next_address(joint, Chain::External).unwrap().address,
        expected
    );

    vault
        .add_contact(
            &session,
            NewContact {
                name: "Exchange".to_string(),
                address: expected.clone(),
                notes: Some("deposit".to_string()),
            },
        )
        .unwrap();
    vault.set_tx_note(&session, &"11".repeat(32), "payroll").unwrap();
    session.lock();

    vault.change_password("first", "second").unwrap();
    assert_eq!(vault.reveal_mnemonic("second").unwrap().as_str(), phrase.as_str());

    let session = vault.unlock("second").unwrap();
    assert_eq!(vault.contacts(&session).unwrap()[0].name, "Exchange");
    assert_eq!(
        vault
            .tx_note(&session, &"11".repeat(32))
            .unwrap()
            .as_deref(),
        Some("payroll")
    );
    assert_eq!(vault.accounts().unwrap().len(), 3);

    let status = vault.migration_status().unwrap();
    assert_eq!(status.state, MigrationState::Committed);
    assert!(!status.rollback_available);
}

#[test]
fn test_legacy_store_migration_roundtrip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut vault = vault_at(dir.path());
    vault
        .create_wallet(Network::Mainnet, ABANDON, "", "pw")
        .unwrap();

    let mut wallet: WalletRecord =
        serde_json::from_slice(&vault.store().get(WALLET_KEY).unwrap().unwrap()).unwrap();
    wallet.version = LEGACY_SCHEMA_VERSION;
    let legacy_wallet = serde_json::to_vec(&wallet).unwrap();
    let legacy_notes = br#"{"version":1,"notes":{"deadbeef":"first purchase"}}"#;
    vault.store_mut().set(WALLET_KEY, &legacy_wallet).unwrap();
    vault.store_mut().set("tx_metadata", legacy_notes).unwrap();

    assert_eq!(
        vault.migration_status().unwrap().state,
        MigrationState::Unmigrated
    );
    assert!(matches!(
        vault.migrate_v1_to_v2("nope"),
        Err(VaultError::DecryptionFailed)
    ));

    let report = vault.migrate_v1_to_v2("pw").unwrap();
    assert_eq!(report.notes_migrated, 1);
    let session = vault.unlock("pw").unwrap();
    assert_eq!(
        vault.tx_note(&session, "deadbeef").unwrap().as_deref(),
        Some("first purchase")
    );

    vault.rollback_migration().unwrap();
    assert_eq!(
        vault.store().get(WALLET_KEY).unwrap().unwrap(),
        legacy_wallet
    );
    assert_eq!(
        vault.store().get("tx_metadata").unwrap().unwrap(),
        legacy_notes.to_vec()
    );
    assert!(!vault.store().contains("contacts").unwrap());
}
