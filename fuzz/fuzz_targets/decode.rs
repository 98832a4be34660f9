#![no_main]

use libfuzzer_sys::fuzz_target;
use permatrix_core::protocol;

fuzz_target!(|data: &[u8]| {
    // Lines arrive as UTF-8 text; invalid bytes are rejected before decoding
    if let Ok(line) = std::str::from_utf8(data) {
        // Anything that decodes must survive a re-encode unchanged
        if let Ok(message) = protocol::decode(line) {
            let encoded = protocol::encode(&message);
            assert_eq!(protocol::decode(&encoded).ok(), Some(message));
        }
    }
});
