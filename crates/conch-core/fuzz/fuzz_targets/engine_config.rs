#![no_main]

use libfuzzer_sys::fuzz_target;
use conch_core::EngineConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Arbitrary TOML must parse or error, never panic.
        let _config = EngineConfig::from_toml_str(input);
    }
});
