#![no_main]

use libfuzzer_sys::fuzz_target;
use conch_core::Registry;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Malformed templates must come back as errors, never panics.
        let registry = Registry::new();
        let _command = registry.register(input);
        let _mode = registry.register_mode(input);

        // Same guarantee for option flag declarations.
        if let Ok(command) = registry.register("carrier") {
            let _option = command.option(input, "fuzzed option");
        }
    }
});
