//! Typed error definitions for Watchtower.
//!
//! This module provides a structured error hierarchy with specific error types
//! for different domains. All errors are designed to be:
//!
//! - **Serializable** for API responses via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for error handling logic via enum variants
//! - **Composable** via thiserror derive macros

mod lookup;
mod monitor;
mod store;

pub use lookup::LookupError;
pub use monitor::MonitorError;
pub use store::StoreError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type that wraps all domain-specific errors.
///
/// Use this when you need a single error type that can represent
/// any Watchtower error.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "domain", content = "error")]
pub enum WatchtowerError {
    /// Wraps a profile-lookup error
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Wraps a monitor scheduling error
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// Wraps a store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Standard Result type using WatchtowerError.
pub type Result<T> = std::result::Result<T, WatchtowerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = WatchtowerError::Monitor(MonitorError::AlreadyWatching {
            handle: "some_account".to_string(),
        });

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Monitor"));
        assert!(json.contains("some_account"));

        let deserialized: WatchtowerError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }

    #[test]
    fn test_error_display() {
        let err = LookupError::Cooldown { retry_in_secs: 120 };

        let msg = format!("{}", err);
        assert!(msg.contains("120"));
    }
}
