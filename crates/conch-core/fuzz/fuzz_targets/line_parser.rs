#![no_main]

use libfuzzer_sys::fuzz_target;
use conch_core::{Registry, parse_line};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let registry = Registry::new();
        let _ = registry.register("deploy <env> [tag]");
        let _ = registry.register("config set <key> <value>");
        let _ = registry.register("say [words...]");

        // Must not panic in either normalization mode.
        let _parsed = parse_line(&registry, input, true);
        let _parsed = parse_line(&registry, input, false);

        // With a catch command every line binds arguments somewhere.
        let _ = registry.register_catch("[tokens...]");
        let _parsed = parse_line(&registry, input, true);
    }
});
