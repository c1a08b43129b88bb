//! # Watchtower Core
//!
//! The resilience and scheduling core: everything between "an operator asked us
//! to watch an identity" and "an HTTP GET went out through the healthiest
//! endpoint and its classified result advanced a state machine".
//!
//! Layering, leaf-first:
//!
//! - [`client::RateLimiter`]: token-bucket admission control
//! - [`client::EndpointPool`]: per-endpoint health tracking and selection
//! - [`client::ResilientClient`]: HTTP GET with timeout, classification, and a
//!   global error-cooldown breaker
//! - [`lookup::ProfileService`]: normalization into canonical profile records,
//!   retry-with-failover across the mirror pool
//! - [`monitor::MonitorScheduler`]: the polling loop and per-watch state machine
//!
//! The store ([`store::EventStore`]) and alert delivery ([`notify::AlertSink`])
//! are trait seams; the core ships a sqlite-backed store and the server wires a
//! webhook sink.

pub mod client;
pub mod lookup;
pub mod monitor;
pub mod notify;
pub mod store;

pub use client::{EndpointPool, FetchOutcome, FetchResponse, ProbeReport, RateLimiter, ResilientClient};
pub use lookup::{LookupReport, ProfileLookup, ProfileService};
pub use monitor::MonitorScheduler;
pub use notify::{AlertSink, LogSink, TransitionAlert};
pub use store::{EventStore, MemoryStore, PersistedEndpointStats, SessionRecord, SqliteStore, StoreSummary};
