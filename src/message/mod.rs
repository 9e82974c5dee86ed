//! Message Model
//!
//! Defines the tagged envelope carried on every wire edge between nodes,
//! together with the enumerations shared across the replication protocols.
//!
//! ## Wire format
//! Messages travel as pipe-delimited ASCII with eleven fields:
//! `kind|sender|receiver|key|value|success|timestamp|sequence|correlation|targets|metadata`.
//! Empty fields encode as empty strings; `targets` is a comma-separated node
//! id list. Keys and values must not contain the pipe character. A receiver
//! that fails to parse drops the message and logs at WARN.

pub mod types;

#[cfg(test)]
mod tests;
