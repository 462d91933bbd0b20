#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use satchel_vault::{decrypt_with_key, envelope::MIN_KDF_ITERATIONS, DerivedKey, EncryptionEnvelope};

fn key() -> &'static DerivedKey {
    static KEY: OnceLock<DerivedKey> = OnceLock::new();
    KEY.get_or_init(|| {
        DerivedKey::derive("fuzz password", b"fuzz salt bytes!", MIN_KDF_ITERATIONS).unwrap()
    })
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary JSON must either be rejected or yield an envelope that fails
    // authentication; forging a valid tag is out of reach for a fuzzer
    if let Ok(envelope) = serde_json::from_slice::<EncryptionEnvelope>(data) {
        assert!(decrypt_with_key(&envelope, key()).is_err());

        let json = serde_json::to_vec(&envelope).unwrap();
        let again: EncryptionEnvelope = serde_json::from_slice(&json).unwrap();
        assert_eq!(envelope, again);
    }
});
