//! HandlerPipeline: ordered handler chain for one subscription.
//!
//! Handlers run sequentially in registration order. The first error stops the
//! chain for that event; nothing already done is rolled back.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::typed::TypedHandler;
use super::{EventHandler, HandlingStatus};
use crate::error::HandlerError;
use crate::event::ReceivedEvent;
use crate::serialization::TypeMap;

/// Aggregated outcome of the pipeline for one event.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Handled,
    /// Every handler reported the event as not applicable.
    Ignored,
    Failed(HandlerError),
}

impl DeliveryOutcome {
    /// Handled and Ignored are both acknowledged.
    pub fn is_success(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failed(_))
    }
}

/// Immutable, ordered chain of handlers. Cheap to clone.
#[derive(Clone)]
pub struct HandlerPipeline {
    handlers: Arc<[Arc<dyn EventHandler>]>,
}

impl Default for HandlerPipeline {
    fn default() -> Self {
        PipelineBuilder::default().build()
    }
}

impl HandlerPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run every handler for `event`, in order.
    pub async fn handle(
        &self,
        event: &ReceivedEvent,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let mut handled = false;

        for handler in self.handlers.iter() {
            if cancel.is_cancelled() {
                return DeliveryOutcome::Failed(HandlerError::Cancelled);
            }

            match handler.handle(event, cancel).await {
                Ok(HandlingStatus::Handled) => handled = true,
                Ok(HandlingStatus::NotApplicable) => {}
                Err(err) => {
                    tracing::debug!(
                        handler = handler.name(),
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        error = %err,
                        "handler failed"
                    );
                    return DeliveryOutcome::Failed(err);
                }
            }
        }

        if handled {
            DeliveryOutcome::Handled
        } else {
            DeliveryOutcome::Ignored
        }
    }
}

/// Builder for a [`HandlerPipeline`]. Registration order is execution order.
#[derive(Default)]
pub struct PipelineBuilder {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl PipelineBuilder {
    /// Append a handler.
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append a shared handler.
    pub fn shared(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Append a typed handler; events not registered in `types` are skipped.
    pub fn on<T, F, Fut>(self, name: &str, types: TypeMap, f: F) -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
        F: Fn(T, ReceivedEvent, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handler(TypedHandler::new(name, types, f))
    }

    pub fn build(self) -> HandlerPipeline {
        HandlerPipeline {
            handlers: self.handlers.into(),
        }
    }
}
