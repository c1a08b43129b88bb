//! Persistence collaborator errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the event/session store.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// The referenced session does not exist.
    #[error("session {0} not found")]
    SessionNotFound(i64),

    /// Payload could not be serialized for storage.
    #[error("serialization error: {0}")]
    Serialization(String),
}
