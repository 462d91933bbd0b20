#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_core::DerivationPath;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(path) = text.parse::<DerivationPath>() {
        // Rendering is canonical: parse(render(p)) == p
        let rendered = path.to_string_path();
        let reparsed: DerivationPath = rendered.parse().unwrap();
        assert_eq!(path, reparsed);
        assert_eq!(reparsed.to_string_path(), rendered);

        // Scheme checks may reject but must not panic
        let _ = path.validate_scheme();
        let _ = path.to_origin_string();
    }
});
