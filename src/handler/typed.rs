use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::{EventHandler, HandlingStatus};
use crate::error::HandlerError;
use crate::event::ReceivedEvent;
use crate::serialization::{EventSerializer, TypeMap};

/// Handler over a deserialized payload type.
///
/// Event types missing from the type map are not applicable. Payloads that
/// fail to decode are skipped with a warning instead of failing delivery, so
/// a poison message cannot hold up the subscription.
pub struct TypedHandler<T, F> {
    name: String,
    types: TypeMap,
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F, Fut> TypedHandler<T, F>
where
    T: DeserializeOwned + Any + Send + Sync,
    F: Fn(T, ReceivedEvent, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, types: TypeMap, f: F) -> Self {
        Self {
            name: name.into(),
            types,
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> EventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Any + Send + Sync,
    F: Fn(T, ReceivedEvent, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        event: &ReceivedEvent,
        cancel: &CancellationToken,
    ) -> Result<HandlingStatus, HandlerError> {
        let decoded = self
            .types
            .deserialize(&event.data, &event.event_type)
            .into_typed::<T>(&event.event_type);

        let value = match decoded {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(HandlingStatus::NotApplicable),
            Err(err) => {
                tracing::warn!(
                    handler = %self.name,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %err,
                    "skipping event with undecodable payload"
                );
                return Ok(HandlingStatus::NotApplicable);
            }
        };

        (self.f)(value, event.clone(), cancel.clone()).await?;
        Ok(HandlingStatus::Handled)
    }
}
