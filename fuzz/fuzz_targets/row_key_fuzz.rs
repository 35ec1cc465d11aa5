//! Fuzz test for the LMDB row key codec
//!
//! Arbitrary bytes must never panic the decoder, and anything it accepts
//! must re-encode to exactly the same bytes.
//!
//! Run with: cargo +nightly fuzz run row_key_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use lnstore_storage::store::row_key;

fuzz_target!(|data: &[u8]| {
    let mut bytes = row_key::table_prefix("t");
    bytes.extend_from_slice(data);

    if let Some(walk) = row_key::decode("t", &bytes) {
        assert_eq!(row_key::encode("t", &walk), bytes, "decoding is canonical");

        // Every prefix of the walk encodes to a byte prefix.
        for len in 0..walk.len() {
            let prefix = row_key::encode("t", &walk[..len]);
            assert!(bytes.starts_with(&prefix));
        }
    }

    // Foreign tables never decode.
    assert!(row_key::decode("u", &bytes).is_none());
});
