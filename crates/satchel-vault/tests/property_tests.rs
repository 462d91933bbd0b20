//! Property-based tests for the encryption envelope
//!
//! Case counts are kept low: every case runs full-strength PBKDF2.

use proptest::prelude::*;
use satchel_vault::{
    decrypt, decrypt_with_key, encrypt_with_key, encrypt_with_password, reencrypt,
    verify_integrity, DerivedKey, VaultError,
};

const ITER: u32 = 100_000;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_envelope_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 1..512),
        password in "[ -~]{1,32}",
    ) {
        let envelope = encrypt_with_password(&plaintext, &password, ITER).unwrap();
        let opened = decrypt(&envelope, &password).unwrap();
        prop_assert_eq!(&opened[..], &plaintext[..]);
    }

    #[test]
    fn prop_wrong_password_never_opens(
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
        password in "[a-z]{8,16}",
        other in "[A-Z]{8,16}",
    ) {
        let envelope = encrypt_with_password(&plaintext, &password, ITER).unwrap();
        prop_assert!(matches!(decrypt(&envelope, &other), Err(VaultError::DecryptionFailed)));
        prop_assert!(!verify_integrity(&envelope, &other));
    }

    #[test]
    fn prop_reencrypt_moves_to_new_password(
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let envelope = encrypt_with_password(&plaintext, "old password", ITER).unwrap();
        let moved = reencrypt(&envelope, "old password", "new password", ITER).unwrap();
        prop_assert_ne!(&moved.salt, &envelope.salt);
        prop_assert!(!verify_integrity(&moved, "old password"));
        prop_assert_eq!(&decrypt(&moved, "new password").unwrap()[..], &plaintext[..]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_shared_key_tamper_detected(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        flip_at in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = DerivedKey::derive("shared", b"0123456789abcdef", ITER).unwrap();
        let mut envelope = encrypt_with_key(&plaintext, &key).unwrap();
        prop_assert!(envelope.uses_shared_key());

        let i = flip_at.index(envelope.ciphertext.len());
        envelope.ciphertext[i] ^= 1 << bit;
        prop_assert!(matches!(
            decrypt_with_key(&envelope, &key),
            Err(VaultError::DecryptionFailed)
        ));
    }
}
