//! Domain models for Watchtower.

mod config;
mod endpoint;
mod profile;
mod watch;

pub use config::{
    ApiConfig, AppConfig, GraphApiConfig, MonitorConfig, RateLimitConfig, RequestConfig,
};
pub use endpoint::{EndpointStatsSnapshot, SelectionStrategy};
pub use profile::{format_count, Profile, Verdict, FIELD_UNAVAILABLE};
pub use watch::{MonitorStatsSnapshot, WatchKind, WatchSummary};
