//! Endpoint pool types shared between the core and the API surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the pool picks the next endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cyclic index over the active subset.
    RoundRobin,
    /// Uniform pick over the active subset.
    Random,
    /// Composite health score (success rate, latency, consecutive failures).
    #[default]
    HealthBased,
}

/// Point-in-time statistics for one endpoint, as exposed by `listEndpoints`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointStatsSnapshot {
    pub url: String,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage in [0, 100].
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub consecutive_failures: u32,
    pub is_active: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}
