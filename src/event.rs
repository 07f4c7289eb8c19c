//! Domain event markers and the event-store origin pointer.
//!
//! `DomainEvent` is the lightweight trait every concrete event struct
//! implements; `ProjectionEvent` is the sum-type seam that lets a projection
//! decode stored bytes back into its handled events. Persistence concerns
//! stay with the stores.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::codec::Codec;

/// Marker trait for events that can be persisted into a projection commit.
///
/// Each event carries a unique [`Self::KIND`] identifier so stored bytes can
/// be routed back to the correct type during replay.
pub trait DomainEvent {
    const KIND: &'static str;
}

/// Extension trait for getting the event kind from an event instance.
///
/// Blanket-implemented for every [`DomainEvent`]; you never implement this
/// yourself.
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }
}

/// Error returned when decoding a stored event fails.
#[derive(Debug, Error)]
pub enum EventDecodeError<CodecError> {
    /// The event kind was not recognized by this event enum.
    #[error("unknown event kind `{kind}`, expected one of {expected:?}")]
    UnknownKind {
        kind: String,
        expected: &'static [&'static str],
    },
    /// The codec failed to deserialize the event data.
    #[error("codec error: {0}")]
    Codec(#[source] CodecError),
}

/// Event sum types that a projection folds.
///
/// Implemented by hand on an enum gathering the events a projection handles,
/// following the same match-on-kind pattern for both directions.
pub trait ProjectionEvent: Sized {
    /// The list of event kinds this sum type can decode.
    const EVENT_KINDS: &'static [&'static str];

    /// The kind identifier of this event instance.
    fn kind(&self) -> &'static str;

    /// Serialize the inner event to bytes.
    ///
    /// # Errors
    ///
    /// Returns the codec's error when encoding fails.
    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error>;

    /// Deserialize an event from its stored representation.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::UnknownKind`] if the kind is not
    /// recognized, or [`EventDecodeError::Codec`] if deserialization fails.
    fn decode<C: Codec>(
        kind: &str,
        data: &[u8],
        codec: &C,
    ) -> Result<Self, EventDecodeError<C::Error>>;
}

/// Globally addressable pointer to the originating event in the event store.
///
/// Doubles as the idempotency key for a projection commit: redelivered events
/// carry the same origin and can be deduplicated per
/// `(projection id, version, origin)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EventOrigin {
    pub aggregate_root_id: String,
    pub aggregate_revision: u64,
    pub event_position: u64,
    pub timestamp: DateTime<Utc>,
}

impl EventOrigin {
    #[must_use]
    pub fn new(
        aggregate_root_id: impl Into<String>,
        aggregate_revision: u64,
        event_position: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            aggregate_root_id: aggregate_root_id.into(),
            aggregate_revision,
            event_position,
            timestamp,
        }
    }
}
