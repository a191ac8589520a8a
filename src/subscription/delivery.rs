//! Event delivery loop: one call per inbound event.
//!
//! Maps the wire event, runs the pipeline, then sends exactly one ack or
//! nack, unless the attachment ended meanwhile, in which case neither is
//! sent. Nothing in here returns an error to the caller.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::failure::FailureHandler;
use super::handle::Shared;
use crate::checkpoint::CheckpointStore;
use crate::event::{ReceivedEvent, WireEvent};
use crate::handler::{DeliveryOutcome, HandlerPipeline};
use crate::transport::{LiveConnection, NackAction};

/// What the delivery loop did with one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Delivered {
    Acked,
    /// Success, acknowledged implicitly by the transport.
    AutoAcked,
    /// Success, but the ack never reached the server. The event will be
    /// redelivered, so its position is not checkpointed.
    AckFailed,
    Nacked(NackAction),
    /// The attachment ended before the outcome could be sent.
    Abandoned,
}

/// Everything a delivery needs, shared by all in-flight events.
pub(crate) struct DeliveryContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) pipeline: HandlerPipeline,
    pub(crate) failure_handler: Arc<dyn FailureHandler>,
    pub(crate) checkpoint: Arc<dyn CheckpointStore>,
    pub(crate) auto_ack: bool,
}

impl DeliveryContext {
    /// Deliver one event received on `connection`.
    ///
    /// `attachment` is cancelled when the subscription stops or the
    /// attachment that delivered the event is dropped.
    pub(crate) async fn deliver(
        &self,
        connection: &dyn LiveConnection,
        attachment: &CancellationToken,
        wire: WireEvent,
    ) -> Delivered {
        let id = self.shared.subscription_id.as_str();
        let event = ReceivedEvent::from_wire(&wire);
        let event_ref = wire.event_ref();
        self.shared.tracker.record(event.global_position);

        let outcome = self.pipeline.handle(&event, attachment).await;

        if attachment.is_cancelled() {
            self.shared.stats.record_abandoned();
            tracing::debug!(
                subscription_id = id,
                event_id = %event.event_id,
                "attachment ended, abandoning acknowledgement"
            );
            return Delivered::Abandoned;
        }

        match outcome {
            DeliveryOutcome::Handled | DeliveryOutcome::Ignored => {
                if matches!(outcome, DeliveryOutcome::Handled) {
                    self.shared.stats.record_handled();
                } else {
                    self.shared.stats.record_ignored();
                    tracing::trace!(
                        subscription_id = id,
                        event_type = %event.event_type,
                        "no handler applies, ignoring"
                    );
                }

                let delivered = if self.auto_ack {
                    Delivered::AutoAcked
                } else {
                    match connection.ack(&event_ref).await {
                        Ok(()) => {
                            self.shared.stats.record_ack();
                            Delivered::Acked
                        }
                        Err(err) => {
                            tracing::warn!(
                                subscription_id = id,
                                event_id = %event_ref.event_id,
                                error = %err,
                                "ack failed"
                            );
                            return Delivered::AckFailed;
                        }
                    }
                };

                if let Err(err) = self.checkpoint.store(id, event.global_position).await {
                    tracing::warn!(subscription_id = id, error = %err, "checkpoint store failed");
                }
                delivered
            }
            DeliveryOutcome::Failed(err) => {
                self.shared.stats.record_failed();
                let action = self.failure_handler.on_failure(&event, &err);
                let reason = err.to_string();
                tracing::warn!(
                    subscription_id = id,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    global_position = event.global_position,
                    retry_count = event.retry_count,
                    %action,
                    error = %reason,
                    "event handling failed"
                );
                match connection.nack(&event_ref, action, &reason).await {
                    Ok(()) => self.shared.stats.record_nack(),
                    Err(err) => tracing::warn!(
                        subscription_id = id,
                        event_id = %event_ref.event_id,
                        error = %err,
                        "nack failed"
                    ),
                }
                Delivered::Nacked(action)
            }
        }
    }
}
