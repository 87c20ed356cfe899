// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration for lock entries and the candidate wire decoder.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MvccError, Result};
use crate::flags::CandidateFlags;

/// Configuration shared by [`crate::LockEntry`] and [`crate::codec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccConfig {
    /// Wait time applied to requests that do not carry their own.
    pub default_timeout: Duration,

    /// Flag bits a decoded candidate keeps from the sender. Everything else
    /// is re-derived by the receiver.
    pub trusted_wire_flags: CandidateFlags,

    /// Maximum reentry stack depth on a single owner.
    pub max_reentry_depth: usize,
}

impl Default for MvccConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            trusted_wire_flags: CandidateFlags::WIRE_TRUSTED,
            max_reentry_depth: 1024,
        }
    }
}

impl MvccConfig {
    /// Bits a peer may never force onto a local candidate. The decoder
    /// strips these even if they appear in `trusted_wire_flags`.
    pub const UNTRUSTABLE: CandidateFlags = CandidateFlags::LOCALITY
        .union(CandidateFlags::REENTRY)
        .union(CandidateFlags::READY)
        .union(CandidateFlags::REMOVED);

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_reentry_depth(mut self, depth: usize) -> Self {
        self.max_reentry_depth = depth;
        self
    }

    #[must_use]
    pub const fn with_trusted_wire_flags(mut self, flags: CandidateFlags) -> Self {
        self.trusted_wire_flags = flags;
        self
    }

    /// Also keep the single-implicit-transaction bit from the wire.
    #[must_use]
    pub const fn with_trusted_single_implicit(mut self) -> Self {
        self.trusted_wire_flags = self
            .trusted_wire_flags
            .union(CandidateFlags::SINGLE_IMPLICIT);
        self
    }

    /// Short waits for latency-sensitive single-key workloads.
    #[must_use]
    pub fn low_latency() -> Self {
        Self {
            default_timeout: Duration::from_millis(500),
            max_reentry_depth: 64,
            ..Default::default()
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidConfig` if the timeout or reentry bound is zero, or if
    /// the trusted wire mask lets a peer set locality or local-only lifecycle
    /// bits.
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(MvccError::InvalidConfig(
                "default_timeout must be non-zero".into(),
            ));
        }
        if self.max_reentry_depth == 0 {
            return Err(MvccError::InvalidConfig(
                "max_reentry_depth must be at least 1".into(),
            ));
        }
        let forbidden = self.trusted_wire_flags.intersection(Self::UNTRUSTABLE);
        if !forbidden.is_empty() {
            return Err(MvccError::InvalidConfig(format!(
                "trusted_wire_flags may not include {forbidden:?}"
            )));
        }
        Ok(())
    }
}
