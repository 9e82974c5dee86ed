//! Metrics Pipeline Module
//!
//! Per-operation lifetime tracking feeding the adaptive policy engine:
//! atomically-updated counters on the hot path, a bounded ring of completed
//! operations for percentile analysis, per-mode aggregates, threshold-driven
//! recommendations and alerts, and a CSV export of the completed ring.
//!
//! The monitor is passed around as an explicit `Arc` handle; there is no
//! process-global instance.

pub mod monitor;

#[cfg(test)]
mod tests;
