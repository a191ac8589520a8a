//! Event handlers and the ordered pipeline that runs them.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sourced_subscriptions::handler::{HandlerPipeline, HandlingStatus};
//! use sourced_subscriptions::serialization;
//!
//! let pipeline = HandlerPipeline::builder()
//!     .handler(ProjectionHandler::new(store))
//!     .on::<OrderCreated, _, _>(
//!         "notify",
//!         serialization::json().register::<OrderCreated>("OrderCreated"),
//!         |created, _event, _cancel| async move {
//!             send_mail(created.id).await?;
//!             Ok(())
//!         },
//!     )
//!     .build();
//! ```

mod pipeline;
mod typed;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use pipeline::{DeliveryOutcome, HandlerPipeline, PipelineBuilder};
pub use typed::TypedHandler;

use crate::error::HandlerError;
use crate::event::ReceivedEvent;

/// Result of a single handler for a single event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlingStatus {
    Handled,
    /// The handler has nothing to do for this event type.
    NotApplicable,
}

/// One application-level event handler.
///
/// Handlers may run more than once for the same event (at-least-once
/// delivery) and should be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(
        &self,
        event: &ReceivedEvent,
        cancel: &CancellationToken,
    ) -> Result<HandlingStatus, HandlerError>;
}
