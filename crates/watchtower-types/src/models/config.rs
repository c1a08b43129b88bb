//! Application configuration.
//!
//! Loaded from a JSON file with serde defaults so a partial config (or none at
//! all) still yields a runnable setup. Environment variables override the
//! handful of values operators most often change.

use serde::{Deserialize, Serialize};

use super::endpoint::SelectionStrategy;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub graph: GraphApiConfig,
    pub rate_limit: RateLimitConfig,
    pub request: RequestConfig,
    pub monitor: MonitorConfig,
    /// Outbound proxy URLs to rotate lookups through. Empty means direct.
    pub proxies: Vec<String>,
    /// Webhook URL for transition alerts. Empty disables the webhook sink.
    pub webhook_url: String,
    /// Operator id that is always authorized.
    pub owner_id: i64,
}

/// Scraped-endpoint pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Candidate mirror base URLs for the profile-lookup endpoint.
    pub mirror_urls: Vec<String>,
    pub rotation_strategy: SelectionStrategy,
    /// Attempts across different endpoints before surfacing the last failure.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mirror_urls: Vec::new(),
            rotation_strategy: SelectionStrategy::HealthBased,
            retry_attempts: 3,
            retry_delay_secs: 2,
        }
    }
}

/// Optional privileged first-party lookup path, tried before the scraped pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphApiConfig {
    pub enabled: bool,
    pub base_url: String,
    pub business_account_id: String,
    pub access_token: String,
    /// Fields requested through the discovery query.
    pub fields: Vec<String>,
}

impl Default for GraphApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://graph.facebook.com/v18.0".to_string(),
            business_account_id: String::new(),
            access_token: String::new(),
            fields: [
                "id",
                "username",
                "name",
                "followers_count",
                "follows_count",
                "media_count",
                "is_verified",
                "biography",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

/// Token-bucket admission control settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: usize,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_minute: 30, burst: 10 }
    }
}

/// Per-request HTTP behavior and the global error breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RequestConfig {
    pub timeout_secs: u64,
    /// Consecutive transport errors before the breaker opens.
    pub max_consecutive_errors: u32,
    /// How long the breaker stays open, in seconds.
    pub error_cooldown_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_secs: 15, max_consecutive_errors: 5, error_cooldown_secs: 300 }
    }
}

/// Scheduler pacing and removal thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Randomized sleep between full passes, in seconds (min, max).
    pub round_interval_secs: (u64, u64),
    /// Randomized delay between items within a pass, in seconds (min, max).
    pub item_delay_secs: (u64, u64),
    /// Idle recheck interval when the queue is empty, in seconds.
    pub idle_wait_secs: u64,
    /// Consecutive poll errors before a watch is dropped without an alert.
    pub max_consecutive_errors: u32,
    /// Queue capacity.
    pub max_watches: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            round_interval_secs: (60, 120),
            item_delay_secs: (10, 20),
            idle_wait_secs: 30,
            max_consecutive_errors: 5,
            max_watches: 50,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"rate_limit": {"requests_per_minute": 12}}"#).unwrap();
        assert_eq!(cfg.rate_limit.requests_per_minute, 12);
        assert_eq!(cfg.rate_limit.burst, 10);
        assert_eq!(cfg.api.retry_attempts, 3);
        assert_eq!(cfg.monitor.round_interval_secs, (60, 120));
    }

    #[test]
    fn test_config_round_trip() {
        let cfg = AppConfig::default();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
