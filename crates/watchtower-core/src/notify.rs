//! Alert delivery seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use watchtower_types::models::{Profile, WatchKind};

/// Everything a sink needs to announce a detected transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransitionAlert {
    pub handle: String,
    pub kind: WatchKind,
    pub detected_at: DateTime<Utc>,
    /// Checks performed over the life of the watch.
    pub checks_performed: u64,
    /// How long the watch ran before firing, in seconds.
    pub watch_duration_secs: u64,
    /// Last profile seen while the account was reachable, if any.
    pub last_profile: Option<Profile>,
}

impl TransitionAlert {
    /// One-line human rendering, shared by the log sink and webhook payload.
    pub fn headline(&self) -> String {
        let event = match self.kind {
            WatchKind::Disappearance => "is no longer reachable",
            WatchKind::Reappearance => "is reachable again",
        };
        format!(
            "@{} {} after {} checks over {}s",
            self.handle, event, self.checks_performed, self.watch_duration_secs
        )
    }
}

/// Delivery failures are logged and never fail the watch.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &TransitionAlert);
}

/// Fallback sink: structured log line only.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, alert: &TransitionAlert) {
        tracing::info!(
            handle = %alert.handle,
            kind = %alert.kind,
            checks = alert.checks_performed,
            "ALERT: {}",
            alert.headline()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headline_wording_per_kind() {
        let alert = TransitionAlert {
            handle: "alice".to_string(),
            kind: WatchKind::Disappearance,
            detected_at: Utc::now(),
            checks_performed: 12,
            watch_duration_secs: 840,
            last_profile: None,
        };
        assert_eq!(alert.headline(), "@alice is no longer reachable after 12 checks over 840s");

        let back = TransitionAlert { kind: WatchKind::Reappearance, ..alert };
        assert!(back.headline().contains("is reachable again"));
    }
}
