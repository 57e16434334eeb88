#![no_main]

use hwcprobe::counters::simulated::SimulatedBackend;
use hwcprobe::selection::SelectionIndex;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let backend = SimulatedBackend::new();
        let _ = SelectionIndex::from_toml_str(input, &backend);
        let _ = SelectionIndex::from_json_str(input, &backend);
    }
});
