//! Watch session types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The transition direction a tracked identity is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    /// Fire when a currently-present identity becomes unreachable.
    Disappearance,
    /// Fire when a currently-absent identity becomes reachable again.
    Reappearance,
}

impl WatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchKind::Disappearance => "disappearance",
            WatchKind::Reappearance => "reappearance",
        }
    }

    /// The sub-flag a fresh watch of this kind starts with: a reappearance
    /// watch assumes the identity is currently absent.
    pub fn initial_absent_flag(&self) -> bool {
        matches!(self, WatchKind::Reappearance)
    }
}

impl std::str::FromStr for WatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disappearance" => Ok(WatchKind::Disappearance),
            "reappearance" => Ok(WatchKind::Reappearance),
            other => Err(format!("unknown watch kind '{other}'")),
        }
    }
}

impl std::fmt::Display for WatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public view of one queued watch, as exposed by the list operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSummary {
    pub handle: String,
    pub kind: WatchKind,
    pub started_at: DateTime<Utc>,
    pub check_count: u64,
    pub currently_absent: bool,
    pub consecutive_errors: u32,
}

/// Aggregate monitor counters, as exposed by `getStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorStatsSnapshot {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub disappearances_detected: u64,
    pub reappearances_detected: u64,
    pub proxy_errors: u64,
    pub api_errors: u64,
    pub active_watches: usize,
    pub proxy_pool_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_absent_flag() {
        assert!(!WatchKind::Disappearance.initial_absent_flag());
        assert!(WatchKind::Reappearance.initial_absent_flag());
    }
}
