// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-thread candidate chains.
//!
//! Every candidate requested by one local thread, across all keys, is linked
//! into a doubly linked list in request order through
//! [`LockCandidate::previous`] and [`LockCandidate::next`]. The candidates
//! only store the links; this registry owns the splice logic and remembers
//! each thread's tail.
//!
//! ```text
//! thread 7:  c(k1) <──> c(k4) <──> c(k2)   <- tail
//! thread 9:  c(k4) <──> c(k8)              <- tail
//! ```
//!
//! Links are non-owning, so a candidate dropped by its entry without being
//! unlinked simply disappears from walks.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::candidate::{CandidateParent, LockCandidate, ThreadId};

/// Tail of each thread's chain. Edits for a thread are serialized by its
/// map shard lock.
pub struct ThreadChains<P: CandidateParent> {
    tails: DashMap<ThreadId, Weak<LockCandidate<P>>>,
}

impl<P: CandidateParent> Default for ThreadChains<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CandidateParent> ThreadChains<P> {
    pub fn new() -> Self {
        Self {
            tails: DashMap::new(),
        }
    }

    /// Append `candidate` to its thread's chain.
    pub fn link(&self, candidate: &Arc<LockCandidate<P>>) {
        let thread_id = candidate.thread_id();
        let mut tail = self.tails.entry(thread_id).or_default();

        match tail.upgrade() {
            Some(last) if Arc::ptr_eq(&last, candidate) => return,
            Some(last) => {
                last.set_next(Some(candidate));
                candidate.set_previous(Some(&last));
            },
            None => candidate.set_previous(None),
        }
        candidate.set_next(None);
        *tail = Arc::downgrade(candidate);

        tracing::trace!(
            thread_id = thread_id,
            version = %candidate.version(),
            "Linked candidate into thread chain"
        );
    }

    /// Remove `candidate` from its thread's chain, joining its neighbours.
    pub fn unlink(&self, candidate: &Arc<LockCandidate<P>>) {
        let thread_id = candidate.thread_id();
        let emptied = {
            let Some(mut tail) = self.tails.get_mut(&thread_id) else {
                return;
            };

            let previous = candidate.previous();
            let next = candidate.next();
            if let Some(p) = &previous {
                p.set_next(next.as_ref());
            }
            if let Some(n) = &next {
                n.set_previous(previous.as_ref());
            }
            candidate.set_previous(None);
            candidate.set_next(None);

            if Weak::ptr_eq(&*tail, &Arc::downgrade(candidate)) {
                *tail = previous.as_ref().map(Arc::downgrade).unwrap_or_default();
            }
            tail.strong_count() == 0
        };

        if emptied {
            self.tails
                .remove_if(&thread_id, |_, tail| tail.strong_count() == 0);
        }
    }

    /// Most recent live candidate of `thread_id`.
    pub fn tail(&self, thread_id: ThreadId) -> Option<Arc<LockCandidate<P>>> {
        self.tails.get(&thread_id).and_then(|tail| tail.upgrade())
    }

    /// Candidates of `thread_id` in request order.
    pub fn chain(&self, thread_id: ThreadId) -> Vec<Arc<LockCandidate<P>>> {
        let mut out = Vec::new();
        let mut cursor = self.tail(thread_id);
        while let Some(candidate) = cursor {
            cursor = candidate.previous();
            out.push(candidate);
        }
        out.reverse();
        out
    }

    /// Number of threads with a live chain.
    pub fn thread_count(&self) -> usize {
        self.tails
            .iter()
            .filter(|tail| tail.strong_count() > 0)
            .count()
    }
}
