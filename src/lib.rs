//! bundle-broker - browser bundles for npm packages, on demand
//!
//! Resolves package versions against the npm registry, builds each one in
//! an isolated worker process under a deadline, and keeps the resulting
//! scripts in a memory + durable cache keyed by a content hash.

pub mod broker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod outcome;
pub mod package;
pub mod protocol;
pub mod registry;
pub mod response;
pub mod ui;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use error::{BrokerError, BrokerResult};
