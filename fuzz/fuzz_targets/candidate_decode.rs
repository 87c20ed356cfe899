//! Fuzz target for candidate wire decoding.
//!
//! Arbitrary frames must either decode into a candidate that carries only
//! trusted flags and re-encodes to the same identity, or be
//! rejected with an error. Never a panic.

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use tensor_mvcc::{codec, CandidateFlags, CandidateParent, MvccConfig};

struct Key;

impl CandidateParent for Key {
    type Key = u8;

    fn key(&self) -> &u8 {
        &0
    }
}

fuzz_target!(|data: &[u8]| {
    let parent = Arc::new(Key);
    let config = MvccConfig::default();

    if let Ok(candidate) = codec::decode(data, &parent, &config) {
        assert_eq!(data.len(), codec::WIRE_LEN);
        assert!(config.trusted_wire_flags.contains(candidate.flags()));
        assert!(!candidate.flags().intersects(CandidateFlags::LOCALITY));

        let again = codec::encode(&candidate);
        // Node id, version, timeout and thread id survive; sequence id and
        // untrusted flags do not.
        assert_eq!(&again[..48], &data[..48]);
    }
});
