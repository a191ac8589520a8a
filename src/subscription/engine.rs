//! PersistentSubscription: builder and driver task.
//!
//! The driver owns the receiving end of the transport channel and reacts to
//! three inputs: inbound events, drop notifications, and the stop signal.
//! Inbound events queue in a local backlog; each is delivered on its own
//! task once one of `buffer_size` semaphore permits is free.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::delivery::DeliveryContext;
use super::failure::{FailureHandler, RetryOnFailure};
use super::handle::{Shared, SubscriptionHandle};
use super::lifecycle::{self, Attachment};
use super::options::{StreamSelector, SubscriptionOptions};
use super::recovery::{
    NoRetry, Recovery, RecoveryMachine, RetryPolicy, SubscriptionExit, SubscriptionState,
};
use crate::checkpoint::{CheckpointStore, NoOpCheckpointStore};
use crate::error::AttachError;
use crate::event::WireEvent;
use crate::handler::HandlerPipeline;
use crate::observe::{FatalReport, SubscriptionObserver, TracingObserver};
use crate::position::TipReader;
use crate::transport::{ConnectionEvent, DropReason, PersistentSubscriptionClient};

/// A durable subscription to a server-managed cursor.
///
/// ## Example
///
/// ```ignore
/// use std::sync::Arc;
/// use sourced_subscriptions::{
///     HandlerPipeline, InMemoryPersistentStore, ParkOnFailure, PersistentSubscription,
///     StreamSelector, SubscriptionOptions,
/// };
///
/// let store = InMemoryPersistentStore::new();
/// let pipeline = HandlerPipeline::builder().handler(OrderProjection::new()).build();
///
/// let handle = PersistentSubscription::new(
///     "order-projection",
///     StreamSelector::stream("orders-1"),
///     Arc::new(store.clone()),
///     pipeline,
/// )
/// .with_options(SubscriptionOptions::new().with_buffer_size(32))
/// .with_failure_handler(ParkOnFailure)
/// .start()
/// .await?;
///
/// // ...
///
/// let stats = handle.shutdown().await;
/// ```
pub struct PersistentSubscription {
    subscription_id: String,
    selector: StreamSelector,
    client: Arc<dyn PersistentSubscriptionClient>,
    pipeline: HandlerPipeline,
    options: SubscriptionOptions,
    failure_handler: Arc<dyn FailureHandler>,
    retry_policy: Arc<dyn RetryPolicy>,
    observer: Arc<dyn SubscriptionObserver>,
    checkpoint: Arc<dyn CheckpointStore>,
    tip_reader: Option<(Arc<dyn TipReader>, Duration)>,
}

impl PersistentSubscription {
    pub fn new(
        subscription_id: impl Into<String>,
        selector: StreamSelector,
        client: Arc<dyn PersistentSubscriptionClient>,
        pipeline: HandlerPipeline,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            selector,
            client,
            pipeline,
            options: SubscriptionOptions::default(),
            failure_handler: Arc::new(RetryOnFailure),
            retry_policy: Arc::new(NoRetry),
            observer: Arc::new(TracingObserver),
            checkpoint: Arc::new(NoOpCheckpointStore),
            tip_reader: None,
        }
    }

    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the default "nack with retry" failure strategy.
    pub fn with_failure_handler<F>(mut self, failure_handler: F) -> Self
    where
        F: FailureHandler + 'static,
    {
        self.failure_handler = Arc::new(failure_handler);
        self
    }

    /// Allow retrying failed resubscribes. Without one, the first failure is fatal.
    pub fn with_retry_policy<P>(mut self, retry_policy: P) -> Self
    where
        P: RetryPolicy + 'static,
    {
        self.retry_policy = Arc::new(retry_policy);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubscriptionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_checkpoint_store(mut self, checkpoint: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Measure the gap to the log's tip every `interval`.
    pub fn with_tip_reader(mut self, reader: Arc<dyn TipReader>, interval: Duration) -> Self {
        self.tip_reader = Some((reader, interval));
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Attach (creating the cursor if needed) and start delivering events.
    pub async fn start(self) -> Result<SubscriptionHandle, AttachError> {
        let shared = Arc::new(Shared::new(&self.subscription_id));

        let attached = match self.options.validate() {
            Ok(()) => {
                lifecycle::attach(
                    self.client.as_ref(),
                    &self.subscription_id,
                    &self.selector,
                    &self.options,
                )
                .await
            }
            Err(err) => Err(err),
        };
        let attachment = match attached {
            Ok(attachment) => attachment,
            Err(err) => {
                shared.set_state(SubscriptionState::Failed);
                self.observer.failed(&FatalReport {
                    subscription_id: self.subscription_id.clone(),
                    last_position: None,
                    reason: None,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let Some(token) = shared.install(Arc::clone(&attachment.connection)) else {
            return Err(AttachError::Cancelled(self.subscription_id));
        };
        shared.set_state(SubscriptionState::Attached);
        self.observer.attached(&self.subscription_id);

        if let Some((reader, interval)) = &self.tip_reader {
            shared.tracker.spawn_monitor(
                Arc::clone(reader),
                Arc::clone(&self.observer),
                *interval,
                shared.cancel.clone(),
            );
        }

        let delivery = Arc::new(DeliveryContext {
            shared: Arc::clone(&shared),
            pipeline: self.pipeline,
            failure_handler: self.failure_handler,
            checkpoint: self.checkpoint,
            auto_ack: self.options.auto_ack,
        });
        let buffer_size = self.options.buffer_size;
        let recovery = RecoveryMachine {
            shared: Arc::clone(&shared),
            client: self.client,
            selector: self.selector,
            options: self.options,
            retry_policy: self.retry_policy,
            observer: self.observer,
        };

        let driver = tokio::spawn(drive(delivery, recovery, buffer_size, attachment, token));
        Ok(SubscriptionHandle::new(shared, driver))
    }
}

async fn drive(
    delivery: Arc<DeliveryContext>,
    recovery: RecoveryMachine,
    buffer_size: usize,
    attachment: Attachment,
    token: CancellationToken,
) -> SubscriptionExit {
    let shared = Arc::clone(&delivery.shared);
    let permits = Arc::new(Semaphore::new(buffer_size));
    let mut in_flight = JoinSet::new();
    // Received but not yet started. The source is read even while every
    // permit is taken, so a drop notice is never stuck behind events.
    let mut backlog: VecDeque<WireEvent> = VecDeque::new();

    let Attachment {
        mut connection,
        mut source,
    } = attachment;
    let mut token = token;

    let exit = loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => break SubscriptionExit::Stopped,

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join(&shared, joined);
            }

            permit = Arc::clone(&permits).acquire_owned(), if !backlog.is_empty() => {
                let (Ok(permit), Some(wire)) = (permit, backlog.pop_front()) else {
                    break SubscriptionExit::Stopped;
                };
                let delivery = Arc::clone(&delivery);
                let connection = Arc::clone(&connection);
                let token = token.clone();
                in_flight.spawn(async move {
                    delivery.deliver(connection.as_ref(), &token, wire).await;
                    drop(permit);
                });
            }

            inbound = source.recv() => {
                let (reason, error) = match inbound {
                    Some(ConnectionEvent::Event(wire)) => {
                        backlog.push_back(wire);
                        continue;
                    }
                    Some(ConnectionEvent::Dropped { reason, error }) => (reason, error),
                    None => (DropReason::NetworkError, None),
                };

                abandon(&shared, &mut backlog);
                match recovery.on_drop(reason, error).await {
                    Recovery::Resumed(next, next_token) => {
                        connection = next.connection;
                        source = next.source;
                        token = next_token;
                    }
                    Recovery::Exit(exit) => break exit,
                }
            }
        }
    };

    // Cancelled deliveries finish without acking; wait for them to settle.
    shared.stop();
    abandon(&shared, &mut backlog);
    while let Some(joined) = in_flight.join_next().await {
        log_join(&shared, joined);
    }

    if exit.is_stopped() {
        shared.set_state(SubscriptionState::Stopped);
    }
    tracing::debug!(
        subscription_id = %shared.subscription_id,
        ?exit,
        "subscription driver finished"
    );
    exit
}

/// Events queued for an attachment that has ended are never delivered.
fn abandon(shared: &Shared, backlog: &mut VecDeque<WireEvent>) {
    if backlog.is_empty() {
        return;
    }
    tracing::debug!(
        subscription_id = %shared.subscription_id,
        count = backlog.len(),
        "discarding undelivered events"
    );
    for _ in backlog.drain(..) {
        shared.stats.record_abandoned();
    }
}

fn log_join(shared: &Shared, joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::error!(
            subscription_id = %shared.subscription_id,
            error = %err,
            "delivery task panicked"
        );
    }
}
