//! Chain Replication Module
//!
//! Writes enter at the head, propagate node by node to the tail, and reads
//! are answered by the tail. The coordinator derives its role from the
//! configured chain order, forwards writes down the chain as
//! `CHAIN_FORWARD` messages, and confirms them upstream with `CHAIN_ACK`s.
//! Optional head-side batching amortises store application and forwarding.

pub mod coordinator;
