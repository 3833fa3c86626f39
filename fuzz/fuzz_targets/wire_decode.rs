//! Arbitrary payloads must decode to a value or an error, never a panic.

#![no_main]

use gossim_core::{split_batch, Decimal, WireReader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for message in split_batch(text) {
        let Ok(mut reader) = WireReader::open(message) else {
            continue;
        };
        let _ = reader.tag();
        // every field shape the algorithms read
        let _ = reader.read::<u64>();
        let _ = reader.read::<Decimal>();
        let _ = reader.read::<Decimal>();
        let _ = reader.rest();
    }
});
