//! Fuzz target for lock entry operation sequences.
//!
//! Drives a single entry with arbitrary local adds, remote adds decoded from
//! the wire, ready and release calls, and checks that at most one candidate
//! owns the lock and that flags never regress.

#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tensor_mvcc::{
    codec, CandidateFlags, CandidateWire, LockEntry, LockRequest, LockVersion, MvccConfig,
};
use uuid::Uuid;

#[derive(Arbitrary, Debug)]
enum Op {
    Add { order: u8, thread: u8, tx: bool },
    AddRemote { order: u8, thread: u8, owner: bool, used: bool },
    Ready { order: u8, remote: bool },
    Release { order: u8, remote: bool },
}

fn version(order: u8, remote: bool) -> LockVersion {
    LockVersion::new(1, u64::from(order) + 1, if remote { 2 } else { 1 })
}

fuzz_target!(|ops: Vec<Op>| {
    let entry = LockEntry::with_config(0u32, MvccConfig::low_latency());
    let node = Uuid::from_u128(1);
    let peer = Uuid::from_u128(2);
    let mut seen: HashMap<LockVersion, CandidateFlags> = HashMap::new();

    for op in ops.iter().take(256) {
        match *op {
            Op::Add { order, thread, tx } => {
                let request = LockRequest::new(node, u64::from(thread), version(order, false))
                    .with_local(true)
                    .with_tx(tx);
                let _ = entry.add_local(request);
            },
            Op::AddRemote { order, thread, owner, used } => {
                let mut flags = CandidateFlags::empty();
                flags.set(CandidateFlags::OWNER, owner);
                flags.set(CandidateFlags::USED, used);
                let wire = CandidateWire {
                    node_id: peer,
                    version: version(order, true),
                    timeout_ms: 100,
                    thread_id: u64::from(thread),
                    sequence_id: 0,
                    flags,
                };
                let mut frame = BytesMut::with_capacity(codec::WIRE_LEN);
                wire.encode(&mut frame);
                if let Ok(candidate) = codec::decode(&frame, &entry, entry.config()) {
                    let _ = entry.add_remote(candidate);
                }
            },
            Op::Ready { order, remote } => {
                let _ = entry.ready(&version(order, remote));
            },
            Op::Release { order, remote } => {
                let _ = entry.release(&version(order, remote));
            },
        }

        let candidates = entry.candidates();
        let owners = candidates
            .iter()
            .filter(|c| c.is_owner() && !c.is_used())
            .count();
        assert!(owners <= 1, "{owners} owners");
        assert!(candidates.windows(2).all(|w| w[0] < w[1]));

        let mut current = HashMap::with_capacity(candidates.len());
        for c in &candidates {
            let flags = c.flags();
            if let Some(prev) = seen.get(&c.version()) {
                assert!(flags.contains(*prev), "flags regressed: {prev} -> {flags}");
            }
            current.insert(c.version(), flags);
        }
        seen = current;
    }
});
