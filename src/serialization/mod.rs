//! Event payload deserialization.
//!
//! A serializer turns `(bytes, event type)` into a typed value. An event type
//! the serializer does not know is not an error: handlers skip it.

mod type_map;

use std::any::Any;

pub use type_map::TypeMap;

use crate::error::SerializationError;

/// Outcome of decoding one payload.
pub enum DeserializationResult {
    Decoded(Box<dyn Any + Send + Sync>),
    /// No decoder registered for the type; skip the event.
    UnknownType,
    Failed(SerializationError),
}

impl DeserializationResult {
    /// Downcast a decoded value, treating a type mismatch as a failure.
    pub fn into_typed<T: Any>(self, event_type: &str) -> Result<Option<T>, SerializationError> {
        match self {
            DeserializationResult::Decoded(value) => value
                .downcast::<T>()
                .map(|boxed| Some(*boxed))
                .map_err(|_| SerializationError::TypeMismatch {
                    event_type: event_type.to_string(),
                }),
            DeserializationResult::UnknownType => Ok(None),
            DeserializationResult::Failed(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for DeserializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeserializationResult::Decoded(_) => f.write_str("Decoded(..)"),
            DeserializationResult::UnknownType => f.write_str("UnknownType"),
            DeserializationResult::Failed(e) => write!(f, "Failed({})", e),
        }
    }
}

/// Trait for decoding event payloads by type name.
pub trait EventSerializer: Send + Sync {
    fn deserialize(&self, data: &[u8], event_type: &str) -> DeserializationResult;
}

/// Payload encodings supported by [`TypeMap`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Json,
    Bitcode,
}

/// JSON serializer over a [`TypeMap`].
pub fn json() -> TypeMap {
    TypeMap::new(Encoding::Json)
}

/// Bitcode serializer over a [`TypeMap`].
pub fn bitcode() -> TypeMap {
    TypeMap::new(Encoding::Bitcode)
}
