//! Redline library crate
//!
//! Everything the `redline` binary does lives here so benchmarks and tests can drive
//! the orchestrator, ledger and cache directly with stub generators and stores.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod content;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod events;
pub mod generator;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod store;
pub mod util;
pub mod vault;
