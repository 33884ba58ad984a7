use serde_json::Value as JsonValue;
use thiserror::Error;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
///
/// The event store persists `event_type`, `schema_version` and `payload` as
/// separate columns; identity, ordering and timestamps are assigned at append
/// time and are not part of the domain event itself.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "AccountOpened").
    fn event_type(&self) -> &str;

    /// Schema version of the payload for this event type.
    fn schema_version(&self) -> u32;

    /// Type-specific payload, without the type tag.
    fn payload(&self) -> JsonValue;
}

/// Reconstructs a typed event from its stored `(type, schema_version, payload)`
/// triple.
///
/// Implementations must stay forward compatible: an unrecognized `event_type`
/// is not an error and should decode into an opaque fallback variant, and
/// unrecognized payload fields must be ignored.
pub trait DecodeEvent: Event + Sized {
    fn decode(
        event_type: &str,
        schema_version: u32,
        payload: &JsonValue,
    ) -> Result<Self, EventDecodeError>;
}

/// A known event type whose stored payload does not match its schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot decode {event_type} v{schema_version}: {reason}")]
pub struct EventDecodeError {
    pub event_type: String,
    pub schema_version: u32,
    pub reason: String,
}

impl EventDecodeError {
    pub fn new(event_type: &str, schema_version: u32, reason: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            schema_version,
            reason: reason.into(),
        }
    }
}
