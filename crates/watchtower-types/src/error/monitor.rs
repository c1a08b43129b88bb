//! Monitor scheduling errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the monitor scheduler's public operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum MonitorError {
    /// A watch already exists for this handle (at most one per identity).
    #[error("already watching {handle}")]
    AlreadyWatching { handle: String },

    /// No watch exists for this handle.
    #[error("not watching {handle}")]
    NotWatching { handle: String },

    /// The watch queue is at capacity.
    #[error("watch queue full ({limit} watches)")]
    QueueFull { limit: usize },

    /// The requesting operator is not authorized.
    #[error("operator {owner} is not authorized")]
    Unauthorized { owner: i64 },

    /// The persistence collaborator rejected an operation.
    #[error("store failure: {message}")]
    Store { message: String },
}
