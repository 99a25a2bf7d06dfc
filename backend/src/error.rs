//! Error types for the book backend

use othello_board::{EvaluationError, PositionError};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the queue, lease, stats and store layers
#[derive(Error, Debug)]
pub enum BackendError {
    /// The relational evaluation store failed
    #[error("Book store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The shared key-value store failed or held a value of the wrong type
    #[error("Key-value store error on {key}: {message}")]
    KeyValue { key: String, message: String },

    /// A lease or stored move list could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A queued or stored position failed to decode
    #[error("Invalid position: {0}")]
    Position(#[from] PositionError),

    /// A submitted or stored evaluation failed validation
    #[error("Invalid evaluation: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Queue settings that cannot work together
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The client has no live lease
    #[error("Unknown client: {0}")]
    UnknownClient(Uuid),
}

impl BackendError {
    pub(crate) fn key_value(key: &str, message: impl Into<String>) -> Self {
        BackendError::KeyValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
