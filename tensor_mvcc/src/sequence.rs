// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide candidate sequence numbers.
//!
//! Every [`crate::LockCandidate`] receives a sequence id from a single
//! global counter. The id only breaks ordering ties between candidates whose
//! versions compare equal but whose keys differ, so it must never repeat for
//! two live candidates in this process. It carries no meaning across nodes.
//!
//! The counter is a plain `fetch_add`; no lock is taken and no teardown is
//! needed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Last sequence id handed out. Ids start at 1.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Allocate the next candidate sequence id.
#[must_use]
pub fn next_sequence_id() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1
}

/// Most recently allocated sequence id, or 0 if none was allocated yet.
#[must_use]
pub fn last_sequence_id() -> u64 {
    SEQUENCE.load(Ordering::Relaxed)
}
