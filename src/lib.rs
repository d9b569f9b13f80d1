//! diff-collector library crate
//!
//! Collects files that changed in running containers or on the host,
//! filters and deduplicates them, and submits the remainder to a scanning
//! engine. The binary is a thin CLI over [`coordinator::RunCoordinator`].

pub mod candidate;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod exclusion;
pub mod filter;
pub mod fingerprint;
pub mod history;
pub mod lock;
pub mod logging;
pub mod output;
pub mod progress;
pub mod retry;
pub mod source;
pub mod staging;
pub mod stats;
pub mod submit;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CollectorConfig;
pub use coordinator::{RunCoordinator, RunState};
pub use error::CollectorError;
