//! Error types for tensor_mvcc.

use thiserror::Error;

use crate::version::LockVersion;

/// Result type for tensor_mvcc operations.
pub type Result<T> = std::result::Result<T, MvccError>;

/// Errors that can occur in tensor_mvcc operations.
///
/// Caller bugs (a dropped parent entry, a nil node id) are not represented
/// here; those abort through assertions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MvccError {
    /// Wire data could not be decoded into a candidate.
    #[error("decode error: {0}")]
    Decode(String),

    /// A set-once version field already holds a different value.
    #[error("{field} conflict: stored {stored}, proposed {proposed}")]
    VersionConflict {
        field: &'static str,
        stored: LockVersion,
        proposed: LockVersion,
    },

    /// No candidate with this version is registered on the entry.
    #[error("unknown candidate: {0}")]
    UnknownCandidate(LockVersion),

    /// Reentry stack grew past the configured bound.
    #[error("reentry depth {depth} exceeds limit {limit}")]
    ReentryLimit { depth: usize, limit: usize },

    /// A peer reported an owner while another candidate holds the lock.
    #[error("owner conflict: current owner {current}, remote owner {proposed}")]
    OwnerConflict {
        current: LockVersion,
        proposed: LockVersion,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MvccError {
    /// Returns true if the error signals a distributed protocol inconsistency
    /// rather than bad input.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::OwnerConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_display() {
        let err = MvccError::Decode("truncated frame".to_string());
        assert_eq!(err.to_string(), "decode error: truncated frame");
    }

    #[test]
    fn test_version_conflict_display() {
        let err = MvccError::VersionConflict {
            field: "owner_version",
            stored: LockVersion::new(1, 10, 2),
            proposed: LockVersion::new(1, 11, 2),
        };
        let msg = err.to_string();
        assert!(msg.contains("owner_version conflict"));
        assert!(msg.contains("1:10:2"));
        assert!(msg.contains("1:11:2"));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_unknown_candidate() {
        let err = MvccError::UnknownCandidate(LockVersion::new(3, 4, 5));
        assert!(err.to_string().contains("unknown candidate: 3:4:5"));
        assert!(!err.is_protocol_violation());
    }

    #[test]
    fn test_reentry_limit() {
        let err = MvccError::ReentryLimit { depth: 9, limit: 8 };
        assert_eq!(err.to_string(), "reentry depth 9 exceeds limit 8");
    }

    #[test]
    fn test_owner_conflict() {
        let err = MvccError::OwnerConflict {
            current: LockVersion::new(1, 5, 2),
            proposed: LockVersion::new(1, 1, 1),
        };
        assert_eq!(
            err.to_string(),
            "owner conflict: current owner 1:5:2, remote owner 1:1:1"
        );
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_invalid_config() {
        let err = MvccError::InvalidConfig("bad".to_string());
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn test_error_debug() {
        let err = MvccError::Decode("x".into());
        assert!(format!("{err:?}").contains("Decode"));
    }
}
