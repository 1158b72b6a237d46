#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Predicate must never panic regardless of input shape.
        let _ = ekuatia::core::validate_control_code(s);
        let _ = ekuatia::core::compute_check_digit(s);
        let _ = ekuatia::core::repair_control_code(s);
    }
});
