//! Relay probing and ranking
//!
//! This module provides functionality for:
//! - Normalizing candidates from various line formats (HOST:PORT, HOST:PORT:USER:PASS, USER:PASS@HOST:PORT)
//! - Probing candidates for reachability, forwarding and anonymity
//! - Running probes with a bounded worker budget and cooperative stop
//! - Tracking the best candidate while results stream in
//! - Persisting known-good candidates to a cache file

pub mod activation;
pub mod aggregator;
pub mod cache;
pub mod checker;
pub mod controller;
pub mod geo;
pub mod models;
pub mod parser;
pub mod persister;
pub mod registry;
pub mod report;

pub use activation::{activate_best, Activation, ProxyActivator};
pub use aggregator::{smart_best, sorted_results, Aggregator, FinalStats, ResultFilter, SortKey};
pub use cache::WorkingCache;
pub use checker::{Probe, RelayProber};
pub use controller::{RunController, RunEvent, RunHandle, RunReport, StopHandle, TestSession};
pub use geo::{GeoInfo, GeoLookup, IpApiLookup, MmdbLookup, NoGeoLookup};
pub use models::{AnonymityLevel, Candidate, ProbeResult, ProbeStatus, UNREACHABLE_MS};
pub use parser::ProxyParser;
pub use persister::{IncrementalPersister, PersisterHandle};
pub use registry::CandidateRegistry;
pub use report::ExportReport;
