//! Quorum Consensus Module
//!
//! Majority-quorum (Paxos-style) replication, one consensus instance per
//! proposal. A proposer collects promises from a majority (prepare phase),
//! then broadcasts the value for a majority to accept (accept phase); reads
//! only need the prepare round. Proposal numbers come from a single
//! monotone counter, proposals age out on a wall-clock deadline, and the
//! majority threshold can be resized adaptively from the measured
//! consensus success rate.

pub mod coordinator;
