// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire encoding for the subset of a candidate sent to remote peers.
//!
//! Wire format (58 bytes, all integers big-endian):
//! ```text
//! +-----------------+-----------------+-------------+---------------+-----------------+-----------+
//! | node id (16B)   | version (16B)   | timeout (8B)| thread id (8B)| sequence id (8B)| flags (2B)|
//! +-----------------+-----------------+-------------+---------------+-----------------+-----------+
//! ```
//!
//! - Node id is the 128-bit UUID value.
//! - Version uses [`LockVersion::encode`].
//! - Timeout is in milliseconds.
//!
//! A receiver keeps only the flag bits in [`MvccConfig::trusted_wire_flags`]
//! (`OWNER`, `USED` and `TX` by default). Locality and every other bit are
//! decided locally, so a peer cannot make a candidate look local, near or DHT.
//! Bits in [`MvccConfig::UNTRUSTABLE`] are stripped even when a misconfigured
//! mask lists them.
//!
//! The creation timestamp and sequence id are also local to the receiver.
//! Sequence ids are unique only within one process, so the sender's id cannot
//! serve as a tie-break here. It stays on the wire so both sides can name the
//! sender's candidate in logs and diagnostics ([`CandidateWire::sequence_id`]).

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::candidate::{CandidateParent, LockCandidate, NodeId, ThreadId};
use crate::config::MvccConfig;
use crate::error::{MvccError, Result};
use crate::flags::CandidateFlags;
use crate::version::LockVersion;

/// Encoded candidate size in bytes.
pub const WIRE_LEN: usize = 16 + LockVersion::WIRE_LEN + 8 + 8 + 8 + 2;

/// Decoded wire fields, before the receiver applies its trust policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateWire {
    pub node_id: NodeId,
    pub version: LockVersion,
    pub timeout_ms: u64,
    pub thread_id: ThreadId,
    /// Sender-side sequence id. Only meaningful on the sender.
    pub sequence_id: u64,
    pub flags: CandidateFlags,
}

impl CandidateWire {
    pub fn from_candidate<P: CandidateParent>(candidate: &LockCandidate<P>) -> Self {
        Self {
            node_id: candidate.node_id(),
            version: candidate.version(),
            timeout_ms: u64::try_from(candidate.timeout().as_millis()).unwrap_or(u64::MAX),
            thread_id: candidate.thread_id(),
            sequence_id: candidate.sequence_id(),
            flags: candidate.flags(),
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u128(self.node_id.as_u128());
        self.version.encode(buf);
        buf.put_u64(self.timeout_ms);
        buf.put_u64(self.thread_id);
        buf.put_u64(self.sequence_id);
        buf.put_u16(self.flags.bits());
    }

    /// # Errors
    ///
    /// Returns `Decode` if the buffer is short, the node id is nil, the
    /// version is empty, or the flag word has undefined bits.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < WIRE_LEN {
            return Err(MvccError::Decode(format!(
                "candidate needs {WIRE_LEN} bytes, {} remaining",
                buf.remaining()
            )));
        }

        let node_id = Uuid::from_u128(buf.get_u128());
        if node_id.is_nil() {
            return Err(MvccError::Decode("nil node id".into()));
        }

        let version = LockVersion::decode(buf)?;
        if version.is_empty() {
            return Err(MvccError::Decode("empty lock version".into()));
        }

        let timeout_ms = buf.get_u64();
        let thread_id = buf.get_u64();
        let sequence_id = buf.get_u64();
        let raw_flags = buf.get_u16();
        let flags = CandidateFlags::from_bits(raw_flags)
            .ok_or_else(|| MvccError::Decode(format!("unknown flag bits {raw_flags:#06x}")))?;

        Ok(Self {
            node_id,
            version,
            timeout_ms,
            thread_id,
            sequence_id,
            flags,
        })
    }

    /// Build a local candidate keeping only `trusted` flag bits, minus
    /// [`MvccConfig::UNTRUSTABLE`].
    pub fn into_candidate<P: CandidateParent>(
        self,
        parent: &Arc<P>,
        trusted: CandidateFlags,
    ) -> LockCandidate<P> {
        let trusted = trusted.difference(MvccConfig::UNTRUSTABLE);
        let kept = self.flags.intersection(trusted);
        let dropped = self.flags.difference(trusted);
        if !dropped.is_empty() {
            tracing::trace!(
                version = %self.version,
                dropped = ?dropped,
                "Ignoring untrusted wire flags"
            );
        }

        LockCandidate::from_wire(
            parent,
            self.node_id,
            self.version,
            Duration::from_millis(self.timeout_ms),
            self.thread_id,
            kept,
        )
    }
}

/// Encode the wire subset of `candidate`.
pub fn encode<P: CandidateParent>(candidate: &LockCandidate<P>) -> Bytes {
    let mut buf = BytesMut::with_capacity(WIRE_LEN);
    CandidateWire::from_candidate(candidate).encode(&mut buf);
    buf.freeze()
}

/// Decode one candidate frame and attach it to `parent`.
///
/// # Errors
///
/// Returns `Decode` on malformed input or trailing bytes. No candidate is
/// produced on error.
pub fn decode<P: CandidateParent>(
    frame: &[u8],
    parent: &Arc<P>,
    config: &MvccConfig,
) -> Result<LockCandidate<P>> {
    let mut buf = frame;
    let wire = CandidateWire::decode(&mut buf).inspect_err(|e| {
        tracing::warn!(len = frame.len(), error = %e, "Rejected candidate frame");
    })?;
    if buf.has_remaining() {
        return Err(MvccError::Decode(format!(
            "{} trailing bytes after candidate",
            buf.remaining()
        )));
    }
    Ok(wire.into_candidate(parent, config.trusted_wire_flags))
}
