// SPDX-License-Identifier: MIT OR Apache-2.0
//! Candidate state bits.
//!
//! A candidate's state is a 16-bit word of independent bits rather than a
//! single enum. Two groups exist:
//!
//! | Group | Bits | Set |
//! |-------|------|-----|
//! | Construction | `LOCAL`, `REENTRY`, `TX`, `SINGLE_IMPLICIT`, `NEAR_LOCAL`, `DHT_LOCAL` | once, when the candidate is built |
//! | Lifecycle | `READY`, `OWNER`, `USED`, `REMOVED` | later, by the owning entry |
//!
//! Lifecycle bits typically appear in the order
//! `ready -> owner -> used -> removed`. Every bit is monotonic: [`AtomicFlags`]
//! exposes no way to clear one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sync_compat::{AtomicU16, Ordering};

bitflags::bitflags! {
    /// Bit set describing a lock candidate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CandidateFlags: u16 {
        /// Lock was requested on this node.
        const LOCAL = 0x01;
        /// Candidate is or was the lock owner.
        const OWNER = 0x02;
        /// Candidate passed admission and may become owner.
        const READY = 0x04;
        /// Candidate is a nested reentrant acquisition.
        const REENTRY = 0x08;
        /// Lock was released by its owner.
        const USED = 0x10;
        /// Request belongs to a transaction.
        const TX = 0x40;
        /// Request belongs to a single-key implicit transaction.
        const SINGLE_IMPLICIT = 0x80;
        /// Candidate is the DHT-side local counterpart.
        const DHT_LOCAL = 0x100;
        /// Candidate is the near-side local counterpart.
        const NEAR_LOCAL = 0x200;
        /// Candidate was detached from its entry.
        const REMOVED = 0x400;
    }
}

impl CandidateFlags {
    /// Bits fixed when a candidate is constructed.
    pub const CONSTRUCTION: Self = Self::LOCAL
        .union(Self::REENTRY)
        .union(Self::TX)
        .union(Self::SINGLE_IMPLICIT)
        .union(Self::NEAR_LOCAL)
        .union(Self::DHT_LOCAL);

    /// Bits set by the locking protocol after construction.
    pub const LIFECYCLE: Self = Self::READY
        .union(Self::OWNER)
        .union(Self::USED)
        .union(Self::REMOVED);

    /// Bits describing where the lock lives; never accepted from a peer.
    pub const LOCALITY: Self = Self::LOCAL.union(Self::NEAR_LOCAL).union(Self::DHT_LOCAL);

    /// Bits trusted from the wire by default.
    pub const WIRE_TRUSTED: Self = Self::OWNER.union(Self::USED).union(Self::TX);

    const NAMES: [(&'static str, Self); 10] = [
        ("local", Self::LOCAL),
        ("owner", Self::OWNER),
        ("ready", Self::READY),
        ("reentry", Self::REENTRY),
        ("used", Self::USED),
        ("tx", Self::TX),
        ("single_implicit", Self::SINGLE_IMPLICIT),
        ("dht_local", Self::DHT_LOCAL),
        ("near_local", Self::NEAR_LOCAL),
        ("removed", Self::REMOVED),
    ];
}

impl fmt::Display for CandidateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, flag)) in Self::NAMES.iter().enumerate() {
            if i != 0 {
                f.write_str("|")?;
            }
            write!(f, "{}={}", name, u8::from(self.contains(*flag)))?;
        }
        Ok(())
    }
}

/// Flag word that can only grow.
///
/// Writers are expected to hold the owning entry's lock, but each set is an
/// atomic read-modify-write so concurrent readers see either the old or the
/// new word, never a torn value.
pub struct AtomicFlags {
    bits: AtomicU16,
}

impl AtomicFlags {
    pub fn new(initial: CandidateFlags) -> Self {
        Self {
            bits: AtomicU16::new(initial.bits()),
        }
    }

    pub fn load(&self) -> CandidateFlags {
        CandidateFlags::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    pub fn contains(&self, flag: CandidateFlags) -> bool {
        self.load().contains(flag)
    }

    /// Set `flag`, returning true if any of its bits were not already set.
    pub fn insert(&self, flag: CandidateFlags) -> bool {
        let prev = self.bits.fetch_or(flag.bits(), Ordering::AcqRel);
        prev & flag.bits() != flag.bits()
    }
}

impl fmt::Debug for AtomicFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicFlags").field(&self.load()).finish()
    }
}
