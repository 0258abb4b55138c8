//! Relay Ranker - concurrent proxy relay prober
//!
//! Probes a large list of candidate relays in parallel, ranks them by
//! forwarding and connect latency, and keeps a cache of known-good relays.

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;

pub use config::Settings;
pub use error::{ProbeError, RegistryError, RunError};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
