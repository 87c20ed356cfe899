// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lock versions: the totally ordered stamps that sequence competing lock
//! requests across the cluster.
//!
//! A [`LockVersion`] identifies one transaction or operation attempt. Versions
//! are compared lexicographically on `(topology_version, order, node_order)`:
//! requests issued under a newer topology always sort after older ones, the
//! per-node `order` counter sequences requests inside a topology, and the
//! issuing node's `node_order` breaks ties between nodes that happen to reach
//! the same counter value.
//!
//! # Wire format
//!
//! ```text
//! +------------------+------------------+------------------+
//! | topology (4B BE) | order (8B BE)    | node order (4B BE)|
//! +------------------+------------------+------------------+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{MvccError, Result};

/// A comparable version stamp for a lock request.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LockVersion {
    /// Cluster topology version the stamp was issued under.
    topology_version: u32,
    /// Per-node monotonically increasing counter.
    order: u64,
    /// Join order of the issuing node, used as the final tie-breaker.
    node_order: u32,
}

impl LockVersion {
    /// Encoded size in bytes.
    pub const WIRE_LEN: usize = 16;

    #[must_use]
    pub const fn new(topology_version: u32, order: u64, node_order: u32) -> Self {
        Self {
            topology_version,
            order,
            node_order,
        }
    }

    #[must_use]
    pub const fn topology_version(&self) -> u32 {
        self.topology_version
    }

    #[must_use]
    pub const fn order(&self) -> u64 {
        self.order
    }

    #[must_use]
    pub const fn node_order(&self) -> u32 {
        self.node_order
    }

    /// The all-zero version is never issued by a [`VersionGenerator`] and is
    /// treated as "no version".
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.topology_version == 0 && self.order == 0 && self.node_order == 0
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.topology_version);
        buf.put_u64(self.order);
        buf.put_u32(self.node_order);
    }

    /// # Errors
    ///
    /// Returns `Decode` if fewer than [`Self::WIRE_LEN`] bytes remain.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(MvccError::Decode(format!(
                "version needs {} bytes, {} remaining",
                Self::WIRE_LEN,
                buf.remaining()
            )));
        }
        let topology_version = buf.get_u32();
        let order = buf.get_u64();
        let node_order = buf.get_u32();
        Ok(Self::new(topology_version, order, node_order))
    }
}

impl fmt::Display for LockVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.topology_version, self.order, self.node_order
        )
    }
}

/// Issues strictly increasing [`LockVersion`]s for one node.
///
/// The order counter is shared by all topology versions so that a version
/// issued later on this node never compares below an earlier one from the
/// same topology.
#[derive(Debug)]
pub struct VersionGenerator {
    node_order: u32,
    order: AtomicU64,
}

impl VersionGenerator {
    #[must_use]
    pub const fn new(node_order: u32) -> Self {
        Self {
            node_order,
            order: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn node_order(&self) -> u32 {
        self.node_order
    }

    /// Issue the next version under `topology_version`.
    pub fn next(&self, topology_version: u32) -> LockVersion {
        let order = self.order.fetch_add(1, Ordering::Relaxed) + 1;
        LockVersion::new(topology_version, order, self.node_order)
    }

    /// Advance the local counter past a version received from a peer so
    /// that versions issued afterwards sort after it.
    pub fn observe(&self, remote: &LockVersion) {
        self.order.fetch_max(remote.order(), Ordering::Relaxed);
    }

    /// Last order value handed out or observed.
    pub fn last_order(&self) -> u64 {
        self.order.load(Ordering::Relaxed)
    }
}
