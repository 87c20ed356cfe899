// SPDX-License-Identifier: MIT OR Apache-2.0
//! TensorMvcc - Lock Candidates for Pessimistic MVCC Locking
//!
//! Every lock request on a cache key is represented by a [`LockCandidate`]:
//! who asked (node and thread), under which [`LockVersion`], and where the
//! request is in its lifecycle. Candidates are totally ordered by version so
//! all nodes agree on who owns a key next.
//!
//! # Architecture
//!
//! ```text
//! LockEntry (per key)
//!   ├── BTreeSet<Arc<LockCandidate>>   ordered by version, then sequence id
//!   │     └── LockCandidate
//!   │           ├── AtomicFlags         monotonic lifecycle bits
//!   │           ├── reentry stack       nested acquisitions by the owner
//!   │           └── previous / next     per-thread chain (ThreadChains)
//!   └── LockEntryStats
//!
//! codec: 58-byte wire subset, trusted-flag filter on decode
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tensor_mvcc::{LockEntry, LockRequest, VersionGenerator};
//! use uuid::Uuid;
//!
//! let versions = VersionGenerator::new(1);
//! let entry = LockEntry::new("users:1".to_string());
//! let node = Uuid::new_v4();
//!
//! let version = versions.next(1);
//! let candidate = entry
//!     .add_local(LockRequest::new(node, 7, version).with_local(true))
//!     .unwrap();
//! entry.ready(&version).unwrap();
//! assert!(candidate.is_owner());
//!
//! entry.release(&version).unwrap();
//! assert!(candidate.is_used());
//! ```

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

pub mod candidate;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod flags;
pub mod sequence;
pub mod sync_compat;
pub mod thread_chain;
pub mod version;

pub use candidate::{
    CandidateParent, CandidateSnapshot, LockCandidate, LockRequest, NodeId, ThreadId,
};
pub use codec::{CandidateWire, WIRE_LEN};
pub use config::MvccConfig;
pub use entry::{
    EntryCandidate, EntryKey, LockEntry, LockEntryStats, LockEntryStatsSnapshot, ReleaseOutcome,
};
pub use error::{MvccError, Result};
pub use flags::{AtomicFlags, CandidateFlags};
pub use sequence::{last_sequence_id, next_sequence_id};
pub use thread_chain::ThreadChains;
pub use version::{LockVersion, VersionGenerator};
