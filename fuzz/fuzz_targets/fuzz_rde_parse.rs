#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Must not panic; errors are fine, panics are bugs.
    let _ = ekuatia::xml::tree::parse_bytes(data);
});
