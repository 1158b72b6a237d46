#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(tree) = ekuatia::xml::tree::parse_bytes(data) {
        // Must not panic; errors are fine, panics are bugs.
        if let Ok(doc) = ekuatia::xml::canonicalize(tree) {
            let _ = doc.serialize();
        }
    }
});
