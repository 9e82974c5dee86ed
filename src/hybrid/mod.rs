//! Hybrid Dispatcher Module
//!
//! The adaptive core that makes the two replication disciplines composable.
//! Every request flows through here: the read-through cache is consulted or
//! invalidated, the policy engine picks a discipline from the measured
//! workload, the chosen coordinator executes, and the outcome feeds the
//! metrics that steer the next decision.
//!
//! ## Submodules
//! - **`cache`**: bounded, TTL-governed read-through cache.
//! - **`types`**: workload patterns and the adaptive metrics snapshot.
//! - **`config`**: the toggles, preferences and policy tunables.
//! - **`dispatcher`**: per-request routing and the mode-scoring policy engine.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod types;

#[cfg(test)]
mod tests;
