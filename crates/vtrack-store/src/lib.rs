//! Job store access for the vtrack reconciliation engine.
//!
//! This crate provides:
//! - The `JobStore` boundary trait
//! - A REST client for PostgREST-style backends, with retry and metrics
//! - An in-memory store for local runs and tests
//! - A Redis Pub/Sub change feed used as an early-poll hint

pub mod change_feed;
pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod types;

#[cfg(test)]
mod client_tests;

pub use change_feed::{ChangeFeed, ChangeSignal};
pub use client::{RestJobStore, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryJobStore;
pub use retry::RetryConfig;
pub use store::{JobStore, StoreOperation};
