//! Network & Membership Module
//!
//! Everything the replication core needs from the outside world, specified
//! at the interface level:
//!
//! - **`peers`**: the directory of known peers with per-peer liveness,
//!   heartbeat timestamps, latency history and send statistics.
//! - **`transport`**: the pluggable message bus: a peer-addressed,
//!   non-blocking `send` plus a single inbound frame channel per node.
//!   Ships an in-process loopback bus (tests, single-process clusters) and
//!   a UDP datagram transport.
//! - **`heartbeat`**: periodic liveness broadcast and the failure detector
//!   that drives failure/recovery callbacks into both coordinators.

pub mod heartbeat;
pub mod peers;
pub mod transport;

#[cfg(test)]
mod tests;
