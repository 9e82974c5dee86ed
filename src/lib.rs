//! Hybrid Chain/Quorum Replicated Key-Value Store
//!
//! This library crate defines the core modules of the replication system.
//! It serves as the foundation for the node binary (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`message`**: The tagged envelope and pipe-delimited wire codec every
//!   inter-node edge speaks.
//! - **`storage`**: The mutex-guarded in-memory key-value store both
//!   replication paths land in.
//! - **`network`**: Peer directory, pluggable transport (loopback bus and
//!   UDP), and the heartbeat/failure-detection service.
//! - **`chain`**: Chain replication: head-ordered writes forwarded node by
//!   node to the tail, tail-served reads, upstream acknowledgements.
//! - **`quorum`**: Paxos-style majority consensus, one instance per
//!   proposal, with adaptive quorum sizing.
//! - **`hybrid`**: The adaptive dispatcher that fronts both coordinators
//!   with a TTL cache and a workload-scoring policy engine.
//! - **`metrics`**: Per-operation lifetime tracking, rolling percentiles,
//!   recommendations and alerts.
//! - **`node`**: The runtime gluing everything into a running cluster
//!   member.

pub mod chain;
pub mod error;
pub mod hybrid;
pub mod message;
pub mod metrics;
pub mod network;
pub mod node;
pub mod quorum;
pub mod storage;
