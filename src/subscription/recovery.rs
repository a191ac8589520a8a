//! Drop & recovery state machine.
//!
//! ```text
//!   Attached ──drop──▶ Dropped ──client initiated──▶ Stopped (silent)
//!                         │
//!                         ▼
//!                    Reattaching ──ok──▶ Attached
//!                         │
//!                         └──policy gives up──▶ Failed (reported once)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::handle::Shared;
use super::lifecycle::{self, Attachment};
use super::options::{StreamSelector, SubscriptionOptions};
use crate::error::{AttachError, SubscriptionError, TransportError};
use crate::observe::{DropReport, FatalReport, SubscriptionObserver};
use crate::transport::{DropReason, PersistentSubscriptionClient};

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Starting,
    Attached,
    Dropped(DropReason),
    Reattaching { attempt: u32 },
    Failed,
    Stopped,
}

/// How a subscription ended.
#[derive(Debug)]
pub enum SubscriptionExit {
    /// Stopped by the client.
    Stopped,
    /// Stopped by a fatal error.
    Failed(SubscriptionError),
}

impl SubscriptionExit {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SubscriptionExit::Stopped)
    }

    pub fn error(&self) -> Option<&SubscriptionError> {
        match self {
            SubscriptionExit::Failed(err) => Some(err),
            SubscriptionExit::Stopped => None,
        }
    }
}

/// Decides whether a failed resubscribe attempt is retried.
pub trait RetryPolicy: Send + Sync {
    /// Delay before attempt `attempt + 1`, or `None` to give up.
    fn next_delay(&self, attempt: u32, error: &AttachError) -> Option<Duration>;
}

impl<F> RetryPolicy for F
where
    F: Fn(u32, &AttachError) -> Option<Duration> + Send + Sync,
{
    fn next_delay(&self, attempt: u32, error: &AttachError) -> Option<Duration> {
        self(attempt, error)
    }
}

/// Give up after the first failed resubscribe. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32, _error: &AttachError) -> Option<Duration> {
        None
    }
}

/// Retry up to `attempts` times in total, waiting `delay` in between.
#[derive(Clone, Copy, Debug)]
pub struct FixedRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl FixedRetry {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl RetryPolicy for FixedRetry {
    fn next_delay(&self, attempt: u32, _error: &AttachError) -> Option<Duration> {
        (attempt < self.attempts).then_some(self.delay)
    }
}

/// What the driver does after a drop was handled.
pub(crate) enum Recovery {
    /// Reattached; carries the new attachment and its cancellation token.
    Resumed(Attachment, CancellationToken),
    Exit(SubscriptionExit),
}

/// Reacts to drop notifications for one subscription.
pub(crate) struct RecoveryMachine {
    pub(crate) shared: Arc<Shared>,
    pub(crate) client: Arc<dyn PersistentSubscriptionClient>,
    pub(crate) selector: StreamSelector,
    pub(crate) options: SubscriptionOptions,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) observer: Arc<dyn SubscriptionObserver>,
}

impl RecoveryMachine {
    /// Handle a drop of the current attachment.
    pub(crate) async fn on_drop(
        &self,
        reason: DropReason,
        error: Option<TransportError>,
    ) -> Recovery {
        let id = self.shared.subscription_id.as_str();
        self.shared.release();

        if reason.is_client_initiated() || self.shared.is_stopped() {
            self.shared.stop();
            self.shared.set_state(SubscriptionState::Stopped);
            tracing::debug!(subscription_id = id, "subscription closed by client");
            return Recovery::Exit(SubscriptionExit::Stopped);
        }

        self.shared.stats.record_drop();
        self.shared.set_state(SubscriptionState::Dropped(reason));
        self.observer.dropped(&DropReport {
            subscription_id: id.to_string(),
            reason,
            error: error.as_ref().map(|e| e.to_string()),
            last_position: self.shared.tracker.last_seen(),
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.shared
                .set_state(SubscriptionState::Reattaching { attempt });
            tracing::info!(subscription_id = id, %reason, attempt, "resubscribing");

            let result = tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    return Recovery::Exit(SubscriptionExit::Stopped);
                }
                result = self.reattach(reason) => result,
            };

            let err = match result {
                Ok(attachment) => match self.shared.install(Arc::clone(&attachment.connection)) {
                    Some(token) => {
                        self.shared.stats.record_reattach();
                        self.shared.set_state(SubscriptionState::Attached);
                        self.observer.attached(id);
                        return Recovery::Resumed(attachment, token);
                    }
                    None => return Recovery::Exit(SubscriptionExit::Stopped),
                },
                Err(err) => err,
            };

            match self.retry_policy.next_delay(attempt, &err) {
                Some(delay) => {
                    tracing::warn!(
                        subscription_id = id,
                        attempt,
                        error = %err,
                        ?delay,
                        "resubscribe failed, retrying"
                    );
                    tokio::select! {
                        _ = self.shared.cancel.cancelled() => {
                            return Recovery::Exit(SubscriptionExit::Stopped);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => return Recovery::Exit(self.fail(reason, attempt, err)),
            }
        }
    }

    async fn reattach(&self, reason: DropReason) -> Result<Attachment, AttachError> {
        let id = self.shared.subscription_id.as_str();
        if reason.requires_recreate() {
            lifecycle::create(self.client.as_ref(), id, &self.selector, &self.options).await?;
        }
        lifecycle::attach(self.client.as_ref(), id, &self.selector, &self.options).await
    }

    fn fail(&self, reason: DropReason, attempts: u32, source: AttachError) -> SubscriptionExit {
        let last_position = self.shared.tracker.last_seen();
        self.observer.failed(&FatalReport {
            subscription_id: self.shared.subscription_id.clone(),
            last_position,
            reason: Some(reason),
            error: source.to_string(),
        });
        self.shared.set_state(SubscriptionState::Failed);
        self.shared.stop();
        SubscriptionExit::Failed(SubscriptionError::Resubscribe {
            subscription_id: self.shared.subscription_id.clone(),
            attempts,
            last_position,
            source,
        })
    }
}
