use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{DeserializationResult, Encoding, EventSerializer};
use crate::error::SerializationError;

type Decoder = Arc<dyn Fn(&[u8], &str) -> DeserializationResult + Send + Sync>;

/// Registry mapping event type names to typed decoders.
///
/// ## Example
///
/// ```
/// use serde::Deserialize;
/// use sourced_subscriptions::serialization::{self, EventSerializer};
///
/// #[derive(Deserialize)]
/// struct OrderCreated { id: String }
///
/// let types = serialization::json().register::<OrderCreated>("OrderCreated");
/// let decoded = types.deserialize(br#"{"id":"o1"}"#, "OrderCreated");
/// let created: OrderCreated = decoded.into_typed("OrderCreated").unwrap().unwrap();
/// assert_eq!(created.id, "o1");
///
/// let unknown = types.deserialize(b"{}", "Unknown");
/// assert!(unknown.into_typed::<OrderCreated>("Unknown").unwrap().is_none());
/// ```
#[derive(Clone)]
pub struct TypeMap {
    encoding: Encoding,
    decoders: HashMap<String, Decoder>,
}

impl TypeMap {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            decoders: HashMap::new(),
        }
    }

    /// Register `T` under `event_type`.
    pub fn register<T>(mut self, event_type: &str) -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let encoding = self.encoding;
        let decoder: Decoder = Arc::new(move |data: &[u8], event_type: &str| {
            let decoded = match encoding {
                Encoding::Json => serde_json::from_slice::<T>(data).map_err(|source| {
                    SerializationError::Json {
                        event_type: event_type.to_string(),
                        source,
                    }
                }),
                Encoding::Bitcode => bitcode::deserialize::<T>(data).map_err(|source| {
                    SerializationError::Bitcode {
                        event_type: event_type.to_string(),
                        source,
                    }
                }),
            };
            match decoded {
                Ok(value) => DeserializationResult::Decoded(Box::new(value)),
                Err(err) => DeserializationResult::Failed(err),
            }
        });
        self.decoders.insert(event_type.to_string(), decoder);
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// List registered type names.
    pub fn event_types(&self) -> Vec<&str> {
        self.decoders.keys().map(|s| s.as_str()).collect()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl EventSerializer for TypeMap {
    fn deserialize(&self, data: &[u8], event_type: &str) -> DeserializationResult {
        match self.decoders.get(event_type) {
            Some(decoder) => decoder(data, event_type),
            None => DeserializationResult::UnknownType,
        }
    }
}
