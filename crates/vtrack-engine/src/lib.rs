//! Job status reconciliation engine.
//!
//! This crate provides:
//! - Per-scope reconciliation passes with at-most-once terminal notifications
//! - Local upload tracking merged into the published view
//! - Retry coordination and bounded-poll timeouts
//! - Timer-driven pollers woken early by change signals
//! - A multi-scope engine with subscription-scoped polling

pub mod config;
pub mod engine;
pub mod error;
pub mod failure_tracker;
pub mod logging;
pub mod metrics;
pub mod notified;
pub mod observer;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod tick_budget;
pub mod upload_tracker;

pub use config::{MonitorConfig, ReconcilerConfig};
pub use engine::ReconciliationEngine;
pub use error::{EngineError, EngineResult, RetryError, RetryResult};
pub use failure_tracker::FailureTracker;
pub use logging::{JobLogger, LoggingObserver};
pub use notified::NotifiedSet;
pub use observer::{ChannelObserver, FnObserver, JobObserver, Subscription};
pub use poller::{PollerHandle, ScopePoller};
pub use reconciler::{Reconciler, ReconcilerStats};
pub use tick_budget::TickBudget;
pub use upload_tracker::UploadTracker;
