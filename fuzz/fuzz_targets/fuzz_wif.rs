#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_core::{decode_wif, private_key_to_wif, Network};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    for network in [Network::Mainnet, Network::Testnet] {
        if let Ok(decoded) = decode_wif(text, network) {
            assert_eq!(decoded.network, network);

            // Base58Check is canonical; surrounding whitespace is not part of the key
            let encoded =
                private_key_to_wif(decoded.private_key(), network, decoded.compressed).unwrap();
            assert_eq!(encoded.as_str(), text.trim());
            assert!(decoded.public_key().is_ok());
        }
    }
});
