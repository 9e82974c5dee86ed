//! Error taxonomy for the replication core.
//!
//! Only faults that cross a module boundary are typed here. Operation-level
//! outcomes (consensus timeout, store miss) travel as `success = false`
//! response envelopes rather than errors, matching the protocol contracts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Malformed wire message; the receiver drops it and logs at WARN.
    #[error("malformed wire message: {0}")]
    Parse(String),

    /// The transport could not enqueue a message for the target peer.
    #[error("transport send to node {target} failed: {reason}")]
    Transport { target: u32, reason: String },
}
