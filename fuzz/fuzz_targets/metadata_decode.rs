#![no_main]

use hwcprobe::metadata::Metadata;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding must reject, never panic
    if let Ok(metadata) = Metadata::decode(data) {
        // Anything that decodes must encode back to something that decodes the same
        let bytes = metadata.encode().unwrap();
        assert_eq!(Metadata::decode(&bytes).unwrap(), metadata);
    }
});
