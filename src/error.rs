//! Error types for a3s-bus

use thiserror::Error;

/// Errors that can occur on the event bus
///
/// Every variant signals a usage bug or a broken collaborator. Lookups
/// that find nothing are not errors; they return `None` / `false`.
#[derive(Debug, Error)]
pub enum EventError {
    /// Operation attempted on a bus that has been closed
    #[error("Event bus '{bus}' is closed")]
    Closed { bus: String },

    /// Malformed type descriptor passed to a registration
    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    /// Delivery context failure (no runtime, worker gone, etc.)
    #[error("Delivery context error: {0}")]
    Context(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for event bus operations
pub type Result<T> = std::result::Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_message_names_bus() {
        let err = EventError::Closed {
            bus: "ui".to_string(),
        };
        assert_eq!(err.to_string(), "Event bus 'ui' is closed");
    }

    #[test]
    fn test_serialization_from_serde() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: EventError = parse.unwrap_err().into();
        assert!(matches!(err, EventError::Serialization(_)));
    }
}
