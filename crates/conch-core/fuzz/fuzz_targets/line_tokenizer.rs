#![no_main]

use libfuzzer_sys::fuzz_target;
use conch_core::{split_pipes, tokenize};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must not panic on unterminated quotes or any other input.
        let _tokens = tokenize(input);
        let _segments = split_pipes(input);
    }
});
