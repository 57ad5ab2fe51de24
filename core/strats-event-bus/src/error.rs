//! Error types for the event bus

use thiserror::Error;
use uuid::Uuid;

use crate::events::EventTag;

/// Synchronous errors raised to the caller at construction or registration time.
///
/// Nothing a handler does during `publish` ends up here; see [`HandlerError`].
#[derive(Error, Debug)]
pub enum BusError {
    #[error("handler '{handler}' declares no accepted event tags")]
    EmptyTagSet { handler: String },

    #[error("unrecognized event tag: {0}")]
    UnknownTag(String),

    #[error("invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BusError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for both ways a tag can be invalid: empty set or unknown name
    pub fn is_invalid_event_tag(&self) -> bool {
        matches!(self, BusError::EmptyTagSet { .. } | BusError::UnknownTag(_))
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

/// A handler failed while processing one event.
///
/// Captured by the bus and stored in the delivery report; never propagated
/// out of `publish`.
#[derive(Error, Debug)]
#[error("handler '{handler}' failed on {tag} event {event_id}: {message}")]
pub struct HandlerError {
    pub handler: String,
    pub tag: EventTag,
    pub event_id: Uuid,
    pub message: String,
    pub panicked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = BusError::EmptyTagSet {
            handler: "Silent".to_string(),
        };
        assert_eq!(err.to_string(), "handler 'Silent' declares no accepted event tags");
        assert!(err.is_invalid_event_tag());

        let err = BusError::config("events.max_history", "must not be negative");
        assert!(!err.is_invalid_event_tag());
        assert!(err.to_string().contains("events.max_history"));
    }

    #[test]
    fn test_handler_error_display() {
        let err = HandlerError {
            handler: "Broker".to_string(),
            tag: EventTag::Order,
            event_id: Uuid::from_u128(7),
            message: "no price".to_string(),
            panicked: false,
        };
        let text = err.to_string();
        assert!(text.contains("'Broker'"));
        assert!(text.contains("ORDER"));
        assert!(text.ends_with("no price"));
    }
}
