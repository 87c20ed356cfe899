// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lock candidates: one node/thread's request for, or grant of, a lock on a
//! single cache key.
//!
//! # Overview
//!
//! A [`LockCandidate`] is created by its owning entry (anything implementing
//! [`CandidateParent`]) when a lock request arrives, inserted into the entry's
//! ordered candidate set, and later driven through its lifecycle bits while
//! the entry's lock is held. Candidates are ordered by [`LockVersion`], which
//! gives every node the same view of who is next in line and lets distributed
//! acquisition converge without a deadlock detector.
//!
//! # Field access
//!
//! | Field | Written | Read |
//! |-------|---------|------|
//! | identity (`node_id`, `version`, `thread_id`, `timeout`, `sequence_id`) | construction | anywhere |
//! | flags | entry lock, atomic RMW | anywhere |
//! | `topology_version`, neighbours, `other_node_id`, `mapped_node_ids` | entry lock, atomic publish | anywhere |
//! | `other_version`, `owner_version` | set once or confirmed | anywhere |
//! | reentry stack | entry lock | entry lock |
//!
//! Readers that do not hold the entry lock may observe a stale value but
//! never a torn one.
//!
//! # Ordering
//!
//! ```text
//! cmp(a, b) = a.version.cmp(b.version)
//!             then (same key ? Equal : a.sequence_id.cmp(b.sequence_id))
//! ```
//!
//! Equal version and equal key is `Equal`, which matches `==`. Hashing uses
//! the version only, so candidates for different keys sharing a version
//! land in the same bucket.
//!
//! # Reentry
//!
//! ```text
//! owner ──reentry──> R2 ──reentry──> R1
//!          (latest)           (first)
//! ```
//!
//! [`LockCandidate::reenter`] pushes a copy onto the stack and
//! [`LockCandidate::unenter`] pops it. The owner's position in the entry and
//! in its thread chain is unaffected.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MvccError, Result};
use crate::flags::{AtomicFlags, CandidateFlags};
use crate::sequence::next_sequence_id;
use crate::sync_compat::{AtomicU64, Mutex, Ordering};
use crate::version::LockVersion;

/// Cluster node identifier.
pub type NodeId = Uuid;

/// Identifier of the local thread that issued a request.
pub type ThreadId = u64;

/// Sentinel for "no topology recorded yet".
const NO_TOPOLOGY: u64 = u64::MAX;

/// The cache entry a candidate belongs to.
///
/// Candidates hold only a weak reference to their parent, so the entry can
/// own its candidates without forming a reference cycle.
pub trait CandidateParent: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync;

    fn key(&self) -> &Self::Key;
}

/// Milliseconds since UNIX epoch, or 0 if the clock is before it.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parameters of an incoming lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub node_id: NodeId,
    pub thread_id: ThreadId,
    pub version: LockVersion,
    /// Maximum wait. Zero means "use the entry's default".
    pub timeout: Duration,
    pub other_node_id: Option<NodeId>,
    pub other_version: Option<LockVersion>,
    /// Construction bits only; lifecycle bits are rejected.
    pub flags: CandidateFlags,
}

impl LockRequest {
    #[must_use]
    pub fn new(node_id: NodeId, thread_id: ThreadId, version: LockVersion) -> Self {
        Self {
            node_id,
            thread_id,
            version,
            timeout: Duration::ZERO,
            other_node_id: None,
            other_version: None,
            flags: CandidateFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_other_node_id(mut self, node_id: NodeId) -> Self {
        self.other_node_id = Some(node_id);
        self
    }

    #[must_use]
    pub fn with_other_version(mut self, version: LockVersion) -> Self {
        self.other_version = Some(version);
        self
    }

    #[must_use]
    pub fn with_local(self, on: bool) -> Self {
        self.with_flag(CandidateFlags::LOCAL, on)
    }

    #[must_use]
    pub fn with_reentry(self, on: bool) -> Self {
        self.with_flag(CandidateFlags::REENTRY, on)
    }

    #[must_use]
    pub fn with_tx(self, on: bool) -> Self {
        self.with_flag(CandidateFlags::TX, on)
    }

    #[must_use]
    pub fn with_single_implicit(self, on: bool) -> Self {
        self.with_flag(CandidateFlags::SINGLE_IMPLICIT, on)
    }

    #[must_use]
    pub fn with_near_local(self, on: bool) -> Self {
        self.with_flag(CandidateFlags::NEAR_LOCAL, on)
    }

    #[must_use]
    pub fn with_dht_local(self, on: bool) -> Self {
        self.with_flag(CandidateFlags::DHT_LOCAL, on)
    }

    fn with_flag(mut self, flag: CandidateFlags, on: bool) -> Self {
        self.flags.set(flag, on);
        self
    }
}

/// Point-in-time view of a candidate, for diagnostics and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub node_id: NodeId,
    pub version: LockVersion,
    pub timeout_ms: u64,
    pub created_at_ms: u64,
    pub thread_id: ThreadId,
    pub sequence_id: u64,
    pub flags: CandidateFlags,
    pub topology_version: Option<u64>,
    pub other_node_id: Option<NodeId>,
    pub other_version: Option<LockVersion>,
    pub owner_version: Option<LockVersion>,
    /// Sorted for stable output.
    pub mapped_node_ids: Vec<NodeId>,
    pub reentry_depth: usize,
    pub previous_version: Option<LockVersion>,
    pub next_version: Option<LockVersion>,
}

/// A request for, or grant of, a lock on one key.
pub struct LockCandidate<P: CandidateParent> {
    parent: Weak<P>,
    node_id: NodeId,
    version: LockVersion,
    timeout: Duration,
    created_at_ms: u64,
    thread_id: ThreadId,
    sequence_id: u64,
    flags: AtomicFlags,
    topology_version: AtomicU64,
    /// Most recent reentry; each reentry links to the one before it.
    reentry: Mutex<Option<Arc<LockCandidate<P>>>>,
    previous: ArcSwapOption<Weak<LockCandidate<P>>>,
    next: ArcSwapOption<Weak<LockCandidate<P>>>,
    other_node_id: ArcSwapOption<NodeId>,
    other_version: OnceLock<LockVersion>,
    mapped_node_ids: ArcSwapOption<HashSet<NodeId>>,
    owner_version: OnceLock<LockVersion>,
}

impl<P: CandidateParent> LockCandidate<P> {
    /// Build a candidate for `request` on `parent`.
    ///
    /// # Panics
    ///
    /// Panics if the request has a nil node id, an empty version, or carries
    /// lifecycle bits. These are caller bugs.
    pub fn new(parent: &Arc<P>, request: &LockRequest) -> Self {
        assert!(
            !request.node_id.is_nil(),
            "lock candidate requires a node id"
        );
        assert!(
            !request.version.is_empty(),
            "lock candidate requires a version"
        );
        assert!(
            CandidateFlags::CONSTRUCTION.contains(request.flags),
            "lifecycle flags cannot be set at construction: {:?}",
            request.flags
        );

        Self::build(
            Arc::downgrade(parent),
            request.node_id,
            request.other_node_id,
            request.other_version,
            request.thread_id,
            request.version,
            request.timeout,
            request.flags,
        )
    }

    /// Rebuild a candidate received from a peer. Only the caller-filtered
    /// `flags` survive; the timestamp and sequence id are local.
    pub(crate) fn from_wire(
        parent: &Arc<P>,
        node_id: NodeId,
        version: LockVersion,
        timeout: Duration,
        thread_id: ThreadId,
        flags: CandidateFlags,
    ) -> Self {
        Self::build(
            Arc::downgrade(parent),
            node_id,
            None,
            None,
            thread_id,
            version,
            timeout,
            flags,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        parent: Weak<P>,
        node_id: NodeId,
        other_node_id: Option<NodeId>,
        other_version: Option<LockVersion>,
        thread_id: ThreadId,
        version: LockVersion,
        timeout: Duration,
        flags: CandidateFlags,
    ) -> Self {
        let other_version_cell = OnceLock::new();
        if let Some(v) = other_version {
            let _ = other_version_cell.set(v);
        }

        Self {
            parent,
            node_id,
            version,
            timeout,
            created_at_ms: now_epoch_millis(),
            thread_id,
            sequence_id: next_sequence_id(),
            flags: AtomicFlags::new(flags),
            topology_version: AtomicU64::new(NO_TOPOLOGY),
            reentry: Mutex::new(None),
            previous: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            other_node_id: ArcSwapOption::new(other_node_id.map(Arc::new)),
            other_version: other_version_cell,
            mapped_node_ids: ArcSwapOption::empty(),
            owner_version: OnceLock::new(),
        }
    }

    // ---- identity ----

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn version(&self) -> LockVersion {
        self.version
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wall-clock creation time. Diagnostic only.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// The owning entry.
    ///
    /// # Panics
    ///
    /// Panics if the entry has been dropped while the candidate is still in
    /// use.
    pub fn parent(&self) -> Arc<P> {
        match self.parent.upgrade() {
            Some(parent) => parent,
            None => panic!(
                "parent entry was dropped for lock candidate {} (seq {})",
                self.version, self.sequence_id
            ),
        }
    }

    /// Key of the owning entry.
    ///
    /// # Panics
    ///
    /// Same contract as [`Self::parent`].
    pub fn key(&self) -> P::Key {
        self.parent().key().clone()
    }

    fn same_key(&self, other: &Self) -> bool {
        let ours = self.parent();
        let theirs = other.parent();
        Arc::ptr_eq(&ours, &theirs) || ours.key() == theirs.key()
    }

    /// True if `version` is ours, or both `node_id` and `thread_id` are.
    pub fn matches(&self, version: &LockVersion, node_id: &NodeId, thread_id: ThreadId) -> bool {
        *version == self.version || (*node_id == self.node_id && thread_id == self.thread_id)
    }

    // ---- flags ----

    pub fn flags(&self) -> CandidateFlags {
        self.flags.load()
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(CandidateFlags::LOCAL)
    }

    pub fn is_reentry(&self) -> bool {
        self.flags.contains(CandidateFlags::REENTRY)
    }

    pub fn is_tx(&self) -> bool {
        self.flags.contains(CandidateFlags::TX)
    }

    pub fn is_single_implicit(&self) -> bool {
        self.flags.contains(CandidateFlags::SINGLE_IMPLICIT)
    }

    pub fn is_near_local(&self) -> bool {
        self.flags.contains(CandidateFlags::NEAR_LOCAL)
    }

    pub fn is_dht_local(&self) -> bool {
        self.flags.contains(CandidateFlags::DHT_LOCAL)
    }

    pub fn is_ready(&self) -> bool {
        self.flags.contains(CandidateFlags::READY)
    }

    pub fn is_owner(&self) -> bool {
        self.flags.contains(CandidateFlags::OWNER)
    }

    pub fn is_used(&self) -> bool {
        self.flags.contains(CandidateFlags::USED)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(CandidateFlags::REMOVED)
    }

    /// Returns true if the bit was not already set.
    pub fn set_ready(&self) -> bool {
        self.flags.insert(CandidateFlags::READY)
    }

    /// Returns true if the bit was not already set.
    pub fn set_owner(&self) -> bool {
        self.flags.insert(CandidateFlags::OWNER)
    }

    /// Returns true if the bit was not already set.
    pub fn set_used(&self) -> bool {
        self.flags.insert(CandidateFlags::USED)
    }

    /// Returns true if the bit was not already set.
    pub fn set_removed(&self) -> bool {
        self.flags.insert(CandidateFlags::REMOVED)
    }

    // ---- concurrently read state ----

    /// Topology the lock was obtained under, if recorded.
    pub fn topology_version(&self) -> Option<u64> {
        match self.topology_version.load(Ordering::Acquire) {
            NO_TOPOLOGY => None,
            v => Some(v),
        }
    }

    pub fn set_topology_version(&self, topology_version: u64) {
        debug_assert_ne!(topology_version, NO_TOPOLOGY);
        self.topology_version
            .store(topology_version, Ordering::Release);
    }

    pub fn other_node_id(&self) -> Option<NodeId> {
        self.other_node_id.load().as_deref().copied()
    }

    pub fn set_other_node_id(&self, node_id: NodeId) {
        self.other_node_id.store(Some(Arc::new(node_id)));
    }

    pub fn mapped_node_ids(&self) -> Option<Arc<HashSet<NodeId>>> {
        self.mapped_node_ids.load_full()
    }

    pub fn set_mapped_node_ids(&self, node_ids: HashSet<NodeId>) {
        self.mapped_node_ids.store(Some(Arc::new(node_ids)));
    }

    /// Version of the paired near/DHT candidate.
    pub fn other_version(&self) -> Option<LockVersion> {
        self.other_version.get().copied()
    }

    /// Record the paired candidate's version, or confirm it matches.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` if a different version is already stored.
    /// The stored value is left unchanged.
    pub fn set_other_version(&self, version: LockVersion) -> Result<()> {
        Self::set_once(&self.other_version, "other_version", version)
    }

    /// Version of the owner at the moment this candidate was added.
    pub fn owner_version(&self) -> Option<LockVersion> {
        self.owner_version.get().copied()
    }

    /// Record the owner's version, or confirm it matches.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` if a different version is already stored.
    pub fn set_owner_version(&self, version: LockVersion) -> Result<()> {
        Self::set_once(&self.owner_version, "owner_version", version)
    }

    fn set_once(
        cell: &OnceLock<LockVersion>,
        field: &'static str,
        proposed: LockVersion,
    ) -> Result<()> {
        let stored = *cell.get_or_init(|| proposed);
        if stored == proposed {
            return Ok(());
        }
        tracing::warn!(
            field = field,
            stored = %stored,
            proposed = %proposed,
            "Set-once version conflict"
        );
        Err(MvccError::VersionConflict {
            field,
            stored,
            proposed,
        })
    }

    // ---- per-thread chain ----

    /// Candidate requested just before this one by the same thread.
    pub fn previous(&self) -> Option<Arc<Self>> {
        self.previous.load().as_ref().and_then(|weak| weak.upgrade())
    }

    pub fn set_previous(&self, previous: Option<&Arc<Self>>) {
        self.previous
            .store(previous.map(|c| Arc::new(Arc::downgrade(c))));
    }

    /// Candidate requested just after this one by the same thread.
    pub fn next(&self) -> Option<Arc<Self>> {
        self.next.load().as_ref().and_then(|weak| weak.upgrade())
    }

    pub fn set_next(&self, next: Option<&Arc<Self>>) {
        self.next.store(next.map(|c| Arc::new(Arc::downgrade(c))));
    }

    // ---- reentry ----

    /// Push a reentrant acquisition onto this candidate's stack and return it.
    ///
    /// The reentry copies identity, pairing and construction bits, is marked
    /// `REENTRY`, and inherits the current topology version.
    pub fn reenter(&self) -> Arc<Self> {
        let mut head = self.reentry.lock();

        let flags = self.flags().intersection(CandidateFlags::CONSTRUCTION) | CandidateFlags::REENTRY;
        let reentry = Self::build(
            self.parent.clone(),
            self.node_id,
            self.other_node_id(),
            self.other_version(),
            self.thread_id,
            self.version,
            self.timeout,
            flags,
        );
        if let Some(topology_version) = self.topology_version() {
            reentry.set_topology_version(topology_version);
        }
        *reentry.reentry.lock() = head.take();

        let reentry = Arc::new(reentry);
        *head = Some(Arc::clone(&reentry));

        tracing::trace!(
            version = %self.version,
            sequence_id = reentry.sequence_id,
            "Reentry pushed"
        );
        reentry
    }

    /// Pop the most recent reentry, detaching it from the rest of the stack.
    pub fn unenter(&self) -> Option<Arc<Self>> {
        let mut head = self.reentry.lock();
        let popped = head.take()?;
        *head = popped.reentry.lock().take();
        Some(popped)
    }

    pub fn has_reentry(&self) -> bool {
        self.reentry.lock().is_some()
    }

    /// Most recent reentry without removing it.
    pub fn reentry_head(&self) -> Option<Arc<Self>> {
        self.reentry.lock().clone()
    }

    /// Number of reentries stacked on this candidate.
    pub fn reentry_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.reentry_head();
        while let Some(candidate) = cursor {
            depth += 1;
            cursor = candidate.reentry_head();
        }
        depth
    }

    pub fn snapshot(&self) -> CandidateSnapshot {
        let mut mapped: Vec<NodeId> = self
            .mapped_node_ids()
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        mapped.sort_unstable();

        CandidateSnapshot {
            node_id: self.node_id,
            version: self.version,
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            created_at_ms: self.created_at_ms,
            thread_id: self.thread_id,
            sequence_id: self.sequence_id,
            flags: self.flags(),
            topology_version: self.topology_version(),
            other_node_id: self.other_node_id(),
            other_version: self.other_version(),
            owner_version: self.owner_version(),
            mapped_node_ids: mapped,
            reentry_depth: self.reentry_depth(),
            previous_version: self.previous().map(|c| c.version),
            next_version: self.next().map(|c| c.version),
        }
    }
}

impl<P: CandidateParent> PartialEq for LockCandidate<P> {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.version == other.version && self.same_key(other)
    }
}

impl<P: CandidateParent> Eq for LockCandidate<P> {}

impl<P: CandidateParent> Hash for LockCandidate<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl<P: CandidateParent> PartialOrd for LockCandidate<P> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<P: CandidateParent> Ord for LockCandidate<P> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        if std::ptr::eq(self, other) {
            return CmpOrdering::Equal;
        }
        self.version.cmp(&other.version).then_with(|| {
            if self.same_key(other) {
                CmpOrdering::Equal
            } else {
                self.sequence_id.cmp(&other.sequence_id)
            }
        })
    }
}

impl<P: CandidateParent> fmt::Debug for LockCandidate<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.parent.upgrade().map(|p| format!("{:?}", p.key()));
        let masks = self.flags().to_string();
        f.debug_struct("LockCandidate")
            .field("key", &key)
            .field("node_id", &self.node_id)
            .field("version", &self.version)
            .field("thread_id", &self.thread_id)
            .field("timeout", &self.timeout)
            .field("created_at_ms", &self.created_at_ms)
            .field("sequence_id", &self.sequence_id)
            .field("topology_version", &self.topology_version())
            .field("masks", &masks)
            .field("other_node_id", &self.other_node_id())
            .field("other_version", &self.other_version())
            .field("owner_version", &self.owner_version())
            .field("prev_version", &self.previous().map(|c| c.version))
            .field("next_version", &self.next().map(|c| c.version))
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::thread;

    struct TestEntry {
        key: String,
    }

    impl CandidateParent for TestEntry {
        type Key = String;

        fn key(&self) -> &String {
            &self.key
        }
    }

    fn entry(key: &str) -> Arc<TestEntry> {
        Arc::new(TestEntry {
            key: key.to_string(),
        })
    }

    fn node() -> NodeId {
        Uuid::new_v4()
    }

    fn v(order: u64) -> LockVersion {
        LockVersion::new(1, order, 1)
    }

    fn candidate(parent: &Arc<TestEntry>, version: LockVersion) -> LockCandidate<TestEntry> {
        LockCandidate::new(parent, &LockRequest::new(node(), 1, version).with_local(true))
    }

    #[test]
    fn test_construction_defaults() {
        let parent = entry("k");
        let node_id = node();
        let request = LockRequest::new(node_id, 42, v(7))
            .with_timeout(Duration::from_millis(250))
            .with_local(true)
            .with_tx(true);
        let c = LockCandidate::new(&parent, &request);

        assert_eq!(c.node_id(), node_id);
        assert_eq!(c.thread_id(), 42);
        assert_eq!(c.version(), v(7));
        assert_eq!(c.timeout(), Duration::from_millis(250));
        assert_eq!(c.key(), "k");
        assert!(c.created_at_ms() > 0);
        assert!(c.sequence_id() > 0);
        assert_eq!(c.flags(), CandidateFlags::LOCAL | CandidateFlags::TX);
        assert_eq!(c.topology_version(), None);
        assert_eq!(c.other_node_id(), None);
        assert_eq!(c.other_version(), None);
        assert_eq!(c.owner_version(), None);
        assert!(c.mapped_node_ids().is_none());
        assert!(c.previous().is_none());
        assert!(c.next().is_none());
        assert!(!c.has_reentry());
    }

    #[test]
    fn test_construction_pairing_fields() {
        let parent = entry("k");
        let other = node();
        let request = LockRequest::new(node(), 1, v(1))
            .with_other_node_id(other)
            .with_other_version(v(99))
            .with_near_local(true);
        let c = LockCandidate::new(&parent, &request);
        assert_eq!(c.other_node_id(), Some(other));
        assert_eq!(c.other_version(), Some(v(99)));
        assert!(c.is_near_local());
        assert!(!c.is_dht_local());
    }

    #[test]
    #[should_panic(expected = "requires a node id")]
    fn test_nil_node_id_panics() {
        let parent = entry("k");
        let _ = LockCandidate::new(&parent, &LockRequest::new(Uuid::nil(), 1, v(1)));
    }

    #[test]
    #[should_panic(expected = "requires a version")]
    fn test_empty_version_panics() {
        let parent = entry("k");
        let _ = LockCandidate::new(
            &parent,
            &LockRequest::new(node(), 1, LockVersion::default()),
        );
    }

    #[test]
    #[should_panic(expected = "lifecycle flags")]
    fn test_lifecycle_flag_at_construction_panics() {
        let parent = entry("k");
        let mut request = LockRequest::new(node(), 1, v(1));
        request.flags |= CandidateFlags::OWNER;
        let _ = LockCandidate::new(&parent, &request);
    }

    #[test]
    #[should_panic(expected = "parent entry was dropped")]
    fn test_key_after_parent_dropped_panics() {
        let parent = entry("k");
        let c = candidate(&parent, v(1));
        drop(parent);
        let _ = c.key();
    }

    #[test]
    fn test_flag_scenario() {
        let parent = entry("k");
        let c = LockCandidate::new(
            &parent,
            &LockRequest::new(node(), 1, v(1))
                .with_local(true)
                .with_reentry(false),
        );
        assert!(c.is_local());
        assert!(!c.is_reentry());
        assert!(!c.is_owner());

        assert!(c.set_owner());
        assert!(c.is_owner());
        assert!(c.is_local(), "earlier bits survive");

        assert!(c.set_ready());
        assert!(c.set_used());
        assert!(c.set_removed());
        assert!(!c.set_owner(), "owner already set");
        assert!(c.is_owner() && c.is_ready() && c.is_used() && c.is_removed());
    }

    #[test]
    fn test_equality_and_ordering_same_key() {
        let parent = entry("k");
        let a = candidate(&parent, v(5));
        let b = candidate(&parent, v(5));
        let c = candidate(&parent, v(6));

        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_eq!(a.cmp(&b), CmpOrdering::Equal);
        assert_ne!(a, c);
        assert_eq!(a.cmp(&c), CmpOrdering::Less);
        assert_eq!(c.cmp(&a), CmpOrdering::Greater);
    }

    #[test]
    fn test_equal_version_different_keys() {
        let first = entry("a");
        let second = entry("b");
        let x = candidate(&first, v(5));
        let y = candidate(&second, v(5));

        assert_ne!(x, y);
        assert_ne!(x.cmp(&y), CmpOrdering::Equal);
        assert_eq!(x.cmp(&y), CmpOrdering::Less, "lower sequence sorts first");
        assert_eq!(y.cmp(&x), CmpOrdering::Greater);
    }

    #[test]
    fn test_distinct_entries_with_equal_keys_are_equal() {
        let first = entry("same");
        let second = entry("same");
        let x = candidate(&first, v(3));
        let y = candidate(&second, v(3));
        assert_eq!(x, y);
        assert_eq!(x.cmp(&y), CmpOrdering::Equal);
    }

    #[test]
    fn test_hash_uses_version_only() {
        use std::collections::hash_map::DefaultHasher;

        let first = entry("a");
        let second = entry("b");
        let x = candidate(&first, v(5));
        let y = candidate(&second, v(5));

        let hash = |c: &LockCandidate<TestEntry>| {
            let mut h = DefaultHasher::new();
            c.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&x), hash(&y));
    }

    #[test]
    fn test_sorted_set_membership_agrees_with_eq() {
        let parent = entry("k");
        let mut set = BTreeSet::new();
        set.insert(Arc::new(candidate(&parent, v(3))));
        set.insert(Arc::new(candidate(&parent, v(1))));
        set.insert(Arc::new(candidate(&parent, v(2))));

        let probe = Arc::new(candidate(&parent, v(2)));
        assert!(set.contains(&probe));
        assert!(!set.insert(probe), "equal candidate is a duplicate");

        let order: Vec<u64> = set.iter().map(|c| c.version().order()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_matches() {
        let parent = entry("k");
        let node_id = node();
        let c = LockCandidate::new(&parent, &LockRequest::new(node_id, 9, v(4)));

        assert!(c.matches(&v(4), &node(), 1), "version match alone");
        assert!(c.matches(&v(100), &node_id, 9), "node and thread match");
        assert!(!c.matches(&v(100), &node_id, 8));
        assert!(!c.matches(&v(100), &node(), 9));
    }

    #[test]
    fn test_other_version_set_once() {
        let parent = entry("k");
        let c = candidate(&parent, v(1));

        assert!(c.set_other_version(v(10)).is_ok());
        assert!(c.set_other_version(v(10)).is_ok());

        let err = c.set_other_version(v(11)).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(c.other_version(), Some(v(10)));
    }

    #[test]
    fn test_other_version_preset_at_construction() {
        let parent = entry("k");
        let c = LockCandidate::new(
            &parent,
            &LockRequest::new(node(), 1, v(1)).with_other_version(v(20)),
        );
        assert!(c.set_other_version(v(20)).is_ok());
        assert!(c.set_other_version(v(21)).is_err());
    }

    #[test]
    fn test_owner_version_set_once() {
        let parent = entry("k");
        let c = candidate(&parent, v(1));
        assert!(c.set_owner_version(v(3)).is_ok());
        assert!(c.set_owner_version(v(3)).is_ok());
        assert_eq!(
            c.set_owner_version(v(4)),
            Err(MvccError::VersionConflict {
                field: "owner_version",
                stored: v(3),
                proposed: v(4),
            })
        );
        assert_eq!(c.owner_version(), Some(v(3)));
    }

    #[test]
    fn test_owner_version_concurrent_first_writer_wins() {
        let parent = entry("k");
        let c = Arc::new(candidate(&parent, v(1)));

        let handles: Vec<_> = (1..=8u64)
            .map(|i| {
                let c = Arc::clone(&c);
                thread::spawn(move || c.set_owner_version(v(i)).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert!(c.owner_version().is_some());
    }

    #[test]
    fn test_mutable_shared_fields() {
        let parent = entry("k");
        let c = candidate(&parent, v(1));

        c.set_topology_version(12);
        assert_eq!(c.topology_version(), Some(12));

        let other = node();
        c.set_other_node_id(other);
        assert_eq!(c.other_node_id(), Some(other));

        let mapped: HashSet<NodeId> = [node(), node()].into_iter().collect();
        c.set_mapped_node_ids(mapped.clone());
        assert_eq!(c.mapped_node_ids().as_deref(), Some(&mapped));
    }

    #[test]
    fn test_reenter_copies_fields() {
        let parent = entry("k");
        let other = node();
        let c = LockCandidate::new(
            &parent,
            &LockRequest::new(node(), 3, v(8))
                .with_timeout(Duration::from_secs(2))
                .with_other_node_id(other)
                .with_other_version(v(80))
                .with_local(true)
                .with_tx(true)
                .with_dht_local(true),
        );
        c.set_topology_version(5);
        c.set_owner();

        let r = c.reenter();
        assert_eq!(r.node_id(), c.node_id());
        assert_eq!(r.thread_id(), 3);
        assert_eq!(r.version(), v(8));
        assert_eq!(r.timeout(), Duration::from_secs(2));
        assert_eq!(r.other_node_id(), Some(other));
        assert_eq!(r.other_version(), Some(v(80)));
        assert_eq!(r.topology_version(), Some(5));
        assert!(r.is_reentry() && r.is_local() && r.is_tx() && r.is_dht_local());
        assert!(!r.is_owner(), "lifecycle bits are not copied");
        assert_ne!(r.sequence_id(), c.sequence_id());
        assert_eq!(*r, c, "same version and key");
        assert!(c.has_reentry());
    }

    #[test]
    fn test_reenter_unenter_round_trip() {
        let parent = entry("k");
        let c = candidate(&parent, v(1));

        let r = c.reenter();
        let popped = c.unenter().unwrap();
        assert!(Arc::ptr_eq(&r, &popped));
        assert!(!c.has_reentry());
        assert!(c.unenter().is_none());
    }

    #[test]
    fn test_reentry_stack_order() {
        let parent = entry("k");
        let c = candidate(&parent, v(1));

        let r1 = c.reenter();
        let r2 = c.reenter();
        assert_eq!(c.reentry_depth(), 2);
        assert!(Arc::ptr_eq(&c.reentry_head().unwrap(), &r2));

        let first = c.unenter().unwrap();
        let second = c.unenter().unwrap();
        assert!(Arc::ptr_eq(&first, &r2));
        assert!(Arc::ptr_eq(&second, &r1));
        assert!(!first.has_reentry(), "popped reentry is detached");
        assert!(c.unenter().is_none());
        assert_eq!(c.reentry_depth(), 0);
    }

    #[test]
    fn test_reentry_does_not_touch_thread_chain() {
        let parent = entry("k");
        let a = Arc::new(candidate(&parent, v(1)));
        let b = Arc::new(candidate(&parent, v(2)));
        a.set_next(Some(&b));
        b.set_previous(Some(&a));

        let _r = b.reenter();
        assert!(Arc::ptr_eq(&b.previous().unwrap(), &a));
        assert!(Arc::ptr_eq(&a.next().unwrap(), &b));
        let _ = b.unenter();
        assert!(Arc::ptr_eq(&b.previous().unwrap(), &a));
    }

    #[test]
    fn test_neighbours_are_non_owning() {
        let parent = entry("k");
        let a = Arc::new(candidate(&parent, v(1)));
        let b = Arc::new(candidate(&parent, v(2)));
        a.set_next(Some(&b));
        assert!(a.next().is_some());

        drop(b);
        assert!(a.next().is_none(), "dropped neighbour is not kept alive");

        a.set_next(None);
        assert!(a.next().is_none());
    }

    #[test]
    fn test_concurrent_construction_unique_sequence() {
        let parent = entry("k");
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let parent = Arc::clone(&parent);
                thread::spawn(move || {
                    (0..250)
                        .map(|i| {
                            LockCandidate::new(
                                &parent,
                                &LockRequest::new(Uuid::new_v4(), t, v(i + 1)),
                            )
                            .sequence_id()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashMap::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id, ()).is_none(), "duplicate sequence id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_snapshot() {
        let parent = entry("k");
        let a = Arc::new(candidate(&parent, v(1)));
        let b = Arc::new(candidate(&parent, v(2)));
        b.set_previous(Some(&a));
        b.set_topology_version(4);
        b.reenter();
        let mapped = [node(), node()];
        b.set_mapped_node_ids(mapped.iter().copied().collect());

        let snap = b.snapshot();
        assert_eq!(snap.version, v(2));
        assert_eq!(snap.topology_version, Some(4));
        assert_eq!(snap.reentry_depth, 1);
        assert_eq!(snap.previous_version, Some(v(1)));
        assert_eq!(snap.next_version, None);
        assert_eq!(snap.mapped_node_ids.len(), 2);
        assert!(snap.mapped_node_ids.windows(2).all(|w| w[0] <= w[1]));

        let bytes = bincode::serialize(&snap).unwrap();
        let back: CandidateSnapshot = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_debug_output() {
        let parent = entry("debug-key");
        let c = candidate(&parent, v(3));
        c.set_owner();
        let out = format!("{c:?}");
        assert!(out.contains("debug-key"));
        assert!(out.contains("owner=1"));
        assert!(out.contains("local=1"));
    }
}
