#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_core::{detect_address_type, script_pubkey, validate_address, Network};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut accepted = 0;
    for network in [Network::Mainnet, Network::Testnet] {
        let detected = detect_address_type(text, network);
        assert_eq!(detected.is_ok(), validate_address(text, network));

        if detected.is_ok() {
            accepted += 1;
            let script = script_pubkey(text, network).unwrap();
            assert!(!script.as_bytes().is_empty());
        }
    }

    // An address belongs to at most one network
    assert!(accepted <= 1);
});
