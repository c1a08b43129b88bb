//! # Watchtower Types
//!
//! Core types, models, and error definitions for Watchtower.
//!
//! This crate provides the foundational type system for the Watchtower workspace:
//!
//! - **`error`** - Typed error hierarchy for lookups, the store, and the monitor
//! - **`models`** - Domain models (Profile, Verdict, WatchKind, endpoint stats, config)
//!
//! `watchtower-types` sits at the bottom of the dependency graph; the core and the
//! server both consume it. All types are designed to be:
//!
//! - **Serializable** via serde for API responses and the config file
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod error;
pub mod models;

pub use error::{LookupError, MonitorError, Result, StoreError, WatchtowerError};

pub use models::{
    AppConfig, EndpointStatsSnapshot, MonitorStatsSnapshot, Profile, SelectionStrategy, Verdict,
    WatchKind, WatchSummary,
};
