// SPDX-License-Identifier: MIT OR Apache-2.0
//! A minimal owning cache entry for lock candidates.
//!
//! [`LockEntry`] holds one key and the ordered set of candidates competing for
//! it. All structural edits and protocol-driven flag changes happen under the
//! entry's mutex; candidates point back at the entry through a weak reference.
//!
//! # Ownership rule
//!
//! The first candidate in version order owns the lock once it is ready. A
//! ready candidate behind it waits, even if it arrived first, so every node
//! that sees the same candidates grants the same owner.
//!
//! ```text
//! add_local / add_remote ──> [ v3 v5 v9 ]   (sorted by version)
//!                              ^
//!                  ready(v3) ──┘ owner
//! release(v3) ──> used + removed, v5 becomes owner if ready
//! ```
//!
//! A request from the node/thread that already owns the lock is a reentry:
//! it is pushed onto the owner's reentry stack instead of being queued, and
//! the matching release pops it again.
//!
//! At most one candidate is owner and not yet used. A remote candidate that
//! arrives already owning the lock while another candidate holds it is
//! rejected with [`MvccError::OwnerConflict`].
//!
//! The entry does not touch per-thread chains. Embedders that track them
//! call [`crate::ThreadChains::link`] after a successful `add_local` and
//! [`crate::ThreadChains::unlink`] once `release` returns
//! [`ReleaseOutcome::Released`].

use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::candidate::{CandidateParent, LockCandidate, LockRequest, NodeId, ThreadId};
use crate::config::MvccConfig;
use crate::error::{MvccError, Result};
use crate::sync_compat::Mutex;
use crate::version::LockVersion;

/// Bounds required of an entry key.
pub trait EntryKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> EntryKey for T {}

/// Candidate type stored by a [`LockEntry`].
pub type EntryCandidate<K> = LockCandidate<LockEntry<K>>;

/// Result of [`LockEntry::release`].
#[derive(Debug)]
pub enum ReleaseOutcome<K: EntryKey> {
    /// A nested acquisition was popped; the lock is still held.
    Reentry(Arc<EntryCandidate<K>>),
    /// The candidate left the entry.
    Released {
        released: Arc<EntryCandidate<K>>,
        /// Candidate granted the lock as a consequence, if any.
        next_owner: Option<Arc<EntryCandidate<K>>>,
    },
}

/// Counters for one entry.
#[derive(Debug, Default)]
pub struct LockEntryStats {
    /// Candidates inserted into the entry.
    pub added: AtomicU64,
    /// Reentries pushed onto an owner.
    pub reentries: AtomicU64,
    /// Ownership grants.
    pub granted: AtomicU64,
    /// Owners that released the lock.
    pub released: AtomicU64,
    /// Waiters removed without owning the lock.
    pub removed: AtomicU64,
    /// Set-once version conflicts observed.
    pub conflicts: AtomicU64,
}

impl LockEntryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LockEntryStatsSnapshot {
        LockEntryStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            reentries: self.reentries.load(Ordering::Relaxed),
            granted: self.granted.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of entry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntryStatsSnapshot {
    pub added: u64,
    pub reentries: u64,
    pub granted: u64,
    pub released: u64,
    pub removed: u64,
    pub conflicts: u64,
}

/// A cache entry owning the lock candidates for one key.
pub struct LockEntry<K: EntryKey> {
    key: K,
    config: MvccConfig,
    candidates: Mutex<BTreeSet<Arc<EntryCandidate<K>>>>,
    stats: LockEntryStats,
}

impl<K: EntryKey> CandidateParent for LockEntry<K> {
    type Key = K;

    fn key(&self) -> &K {
        &self.key
    }
}

impl<K: EntryKey> LockEntry<K> {
    pub fn new(key: K) -> Arc<Self> {
        Self::with_config(key, MvccConfig::default())
    }

    pub fn with_config(key: K, config: MvccConfig) -> Arc<Self> {
        Arc::new(Self {
            key,
            config,
            candidates: Mutex::new(BTreeSet::new()),
            stats: LockEntryStats::new(),
        })
    }

    pub fn config(&self) -> &MvccConfig {
        &self.config
    }

    pub fn stats(&self) -> &LockEntryStats {
        &self.stats
    }

    /// Register a lock request issued on this node.
    ///
    /// If the requesting node/thread already owns the lock, a reentry is
    /// pushed onto the owner and returned. If a candidate with the same
    /// version is already present, that candidate is returned.
    ///
    /// # Errors
    ///
    /// Returns `ReentryLimit` if the owner's reentry stack is full, or
    /// `VersionConflict` if the owner version cannot be recorded.
    pub fn add_local(self: &Arc<Self>, request: LockRequest) -> Result<Arc<EntryCandidate<K>>> {
        let mut candidates = self.candidates.lock();

        if let Some(owner) = Self::current_owner(&candidates) {
            if owner.node_id() == request.node_id && owner.thread_id() == request.thread_id {
                return self.reenter_owner(&owner);
            }
        }

        let mut request = request;
        if request.timeout.is_zero() {
            request.timeout = self.config.default_timeout;
        }
        let candidate = Arc::new(LockCandidate::new(self, &request));
        self.insert_locked(&mut candidates, candidate)
    }

    /// Register a candidate received from a peer, typically built by
    /// [`crate::codec::decode`] against this entry.
    ///
    /// # Panics
    ///
    /// Panics if `candidate` was built for a different entry.
    ///
    /// # Errors
    ///
    /// Returns `OwnerConflict` if the candidate arrives as an active owner
    /// while another candidate holds the lock; the entry is left unchanged.
    /// Returns `VersionConflict` if the owner version cannot be recorded.
    pub fn add_remote(
        self: &Arc<Self>,
        candidate: EntryCandidate<K>,
    ) -> Result<Arc<EntryCandidate<K>>> {
        assert!(
            Arc::ptr_eq(&candidate.parent(), self),
            "remote candidate {} belongs to another entry",
            candidate.version()
        );
        let mut candidates = self.candidates.lock();
        self.insert_locked(&mut candidates, Arc::new(candidate))
    }

    /// Mark the candidate with `version` ready and grant the lock if it is
    /// now first in line. Returns the newly granted owner, if any.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCandidate` if no candidate has this version.
    pub fn ready(&self, version: &LockVersion) -> Result<Option<Arc<EntryCandidate<K>>>> {
        let candidates = self.candidates.lock();
        let candidate = Self::find(&candidates, version)?;
        candidate.set_ready();
        Ok(self.assign_owner(&candidates))
    }

    /// Release the lock held by the candidate with `version`.
    ///
    /// Pops one reentry if the candidate has any; otherwise the candidate is
    /// marked used and removed, leaves the entry, and the next ready candidate
    /// in order is granted the lock.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCandidate` if no candidate has this version.
    pub fn release(&self, version: &LockVersion) -> Result<ReleaseOutcome<K>> {
        let mut candidates = self.candidates.lock();
        let candidate = Self::find(&candidates, version)?;

        if let Some(reentry) = candidate.unenter() {
            tracing::debug!(
                key = ?self.key,
                version = %version,
                depth = candidate.reentry_depth(),
                "Reentry released"
            );
            return Ok(ReleaseOutcome::Reentry(reentry));
        }

        if candidate.is_owner() {
            candidate.set_used();
            self.stats.released.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.removed.fetch_add(1, Ordering::Relaxed);
        }
        candidate.set_removed();
        candidates.remove(&candidate);

        let next_owner = self.assign_owner(&candidates);
        tracing::debug!(
            key = ?self.key,
            version = %version,
            next_owner = ?next_owner.as_ref().map(|c| c.version()),
            "Lock candidate released"
        );
        Ok(ReleaseOutcome::Released {
            released: candidate,
            next_owner,
        })
    }

    /// Current owner, if the lock is held.
    pub fn owner(&self) -> Option<Arc<EntryCandidate<K>>> {
        Self::current_owner(&self.candidates.lock())
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// True if the lock is held by `thread_id` on `node_id`.
    pub fn is_locked_by_thread(&self, node_id: &NodeId, thread_id: ThreadId) -> bool {
        self.owner()
            .is_some_and(|owner| owner.node_id() == *node_id && owner.thread_id() == thread_id)
    }

    pub fn candidate(&self, version: &LockVersion) -> Option<Arc<EntryCandidate<K>>> {
        Self::find(&self.candidates.lock(), version).ok()
    }

    /// First candidate matching `version`, or the `node_id`/`thread_id` pair.
    pub fn matching(
        &self,
        version: &LockVersion,
        node_id: &NodeId,
        thread_id: ThreadId,
    ) -> Option<Arc<EntryCandidate<K>>> {
        self.candidates
            .lock()
            .iter()
            .find(|c| c.matches(version, node_id, thread_id))
            .cloned()
    }

    /// All live candidates in lock order.
    pub fn candidates(&self) -> Vec<Arc<EntryCandidate<K>>> {
        self.candidates.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.lock().is_empty()
    }

    fn reenter_owner(&self, owner: &Arc<EntryCandidate<K>>) -> Result<Arc<EntryCandidate<K>>> {
        let depth = owner.reentry_depth() + 1;
        if depth > self.config.max_reentry_depth {
            return Err(MvccError::ReentryLimit {
                depth,
                limit: self.config.max_reentry_depth,
            });
        }
        let reentry = owner.reenter();
        self.stats.reentries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = ?self.key,
            version = %owner.version(),
            depth = depth,
            "Owner reentered"
        );
        Ok(reentry)
    }

    fn insert_locked(
        &self,
        candidates: &mut BTreeSet<Arc<EntryCandidate<K>>>,
        candidate: Arc<EntryCandidate<K>>,
    ) -> Result<Arc<EntryCandidate<K>>> {
        if let Some(existing) = candidates.get(&candidate) {
            return Ok(Arc::clone(existing));
        }

        if let Some(owner) = Self::current_owner(candidates) {
            if candidate.is_owner() && !candidate.is_used() {
                self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = ?self.key,
                    current = %owner.version(),
                    proposed = %candidate.version(),
                    node_id = %candidate.node_id(),
                    "Rejected remote owner while lock is held"
                );
                return Err(MvccError::OwnerConflict {
                    current: owner.version(),
                    proposed: candidate.version(),
                });
            }
            if let Err(e) = candidate.set_owner_version(owner.version()) {
                self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }

        candidates.insert(Arc::clone(&candidate));
        self.stats.added.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = ?self.key,
            version = %candidate.version(),
            local = candidate.is_local(),
            "Lock candidate added"
        );
        Ok(candidate)
    }

    fn find(
        candidates: &BTreeSet<Arc<EntryCandidate<K>>>,
        version: &LockVersion,
    ) -> Result<Arc<EntryCandidate<K>>> {
        candidates
            .iter()
            .find(|c| c.version() == *version)
            .cloned()
            .ok_or(MvccError::UnknownCandidate(*version))
    }

    fn current_owner(
        candidates: &BTreeSet<Arc<EntryCandidate<K>>>,
    ) -> Option<Arc<EntryCandidate<K>>> {
        candidates
            .iter()
            .find(|c| c.is_owner() && !c.is_used())
            .cloned()
    }

    fn assign_owner(
        &self,
        candidates: &BTreeSet<Arc<EntryCandidate<K>>>,
    ) -> Option<Arc<EntryCandidate<K>>> {
        if Self::current_owner(candidates).is_some() {
            return None;
        }
        let first = candidates.first()?;
        if !first.is_ready() || !first.set_owner() {
            return None;
        }
        self.stats.granted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = ?self.key,
            version = %first.version(),
            node_id = %first.node_id(),
            thread_id = first.thread_id(),
            "Lock granted"
        );
        Some(Arc::clone(first))
    }
}

impl<K: EntryKey> fmt::Debug for LockEntry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockEntry")
            .field("key", &self.key)
            .field("candidates", &self.len())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
