#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // The trace loader should reject bad input with an error, never a panic.
        let _ = popcanon_trace::parse(source);
    }
});
