//! SubscriptionHandle: the caller's grip on one running subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::recovery::{SubscriptionExit, SubscriptionState};
use crate::error::SubscriptionError;
use crate::observe::{StatsSnapshot, SubscriptionStats};
use crate::position::GapTracker;
use crate::transport::LiveConnection;

struct Slot {
    connection: Arc<dyn LiveConnection>,
    attachment: CancellationToken,
}

/// State shared between the handle, the driver task and in-flight deliveries.
pub(crate) struct Shared {
    pub(crate) subscription_id: String,
    /// Subscription lifetime.
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: SubscriptionStats,
    pub(crate) tracker: GapTracker,
    slot: Mutex<Option<Slot>>,
    stopped: AtomicBool,
    state: Mutex<SubscriptionState>,
}

impl Shared {
    pub(crate) fn new(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            cancel: CancellationToken::new(),
            stats: SubscriptionStats::default(),
            tracker: GapTracker::new(subscription_id),
            slot: Mutex::new(None),
            stopped: AtomicBool::new(false),
            state: Mutex::new(SubscriptionState::Starting),
        }
    }

    /// Make `connection` the current attachment.
    ///
    /// Returns the attachment's cancellation token (a child of the lifetime),
    /// or `None` when the subscription was stopped meanwhile; the connection
    /// is then closed right away.
    pub(crate) fn install(&self, connection: Arc<dyn LiveConnection>) -> Option<CancellationToken> {
        let mut slot = self.slot.lock();
        if self.stopped.load(Ordering::Acquire) {
            drop(slot);
            connection.close();
            return None;
        }
        let attachment = self.cancel.child_token();
        if let Some(previous) = slot.replace(Slot {
            connection,
            attachment: attachment.clone(),
        }) {
            previous.attachment.cancel();
            previous.connection.close();
        }
        Some(attachment)
    }

    /// End the current attachment: cancel its in-flight work and close its
    /// connection. A connection is only ever closed once.
    pub(crate) fn release(&self) {
        let taken = self.slot.lock().take();
        if let Some(slot) = taken {
            slot.attachment.cancel();
            slot.connection.close();
        }
    }

    /// Stop the subscription. Idempotent.
    pub(crate) fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        self.release();
        true
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: SubscriptionState) {
        tracing::trace!(subscription_id = %self.subscription_id, ?state, "state change");
        *self.state.lock() = state;
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }
}

/// Handle to a running persistent subscription. Drop or call `stop()` to shut down.
///
/// ## Example
///
/// ```ignore
/// let handle = PersistentSubscription::new("sub-A", selector, client, pipeline)
///     .start()
///     .await?;
///
/// // ... events are delivered in the background ...
///
/// let stats = handle.shutdown().await;
/// println!("handled {} events", stats.handled);
/// ```
pub struct SubscriptionHandle {
    shared: Arc<Shared>,
    driver: Option<JoinHandle<SubscriptionExit>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(shared: Arc<Shared>, driver: JoinHandle<SubscriptionExit>) -> Self {
        Self {
            shared,
            driver: Some(driver),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.shared.subscription_id
    }

    /// Stop the subscription.
    ///
    /// Cancels in-flight handlers (their events are neither acked nor nacked)
    /// and disposes the live connection. Calling it again does nothing.
    pub fn stop(&self) {
        if self.shared.stop() {
            tracing::info!(subscription_id = %self.shared.subscription_id, "subscription stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Highest global position delivered so far.
    pub fn last_position(&self) -> Option<u64> {
        self.shared.tracker.last_seen()
    }

    /// The position tracker, for gap measurements.
    pub fn tracker(&self) -> &GapTracker {
        &self.shared.tracker
    }

    /// Wait for the subscription to end, by `stop()` or a fatal error.
    pub async fn join(mut self) -> SubscriptionExit {
        let Some(driver) = self.driver.take() else {
            return SubscriptionExit::Stopped;
        };
        match driver.await {
            Ok(exit) => exit,
            Err(err) => {
                tracing::error!(
                    subscription_id = %self.shared.subscription_id,
                    error = %err,
                    "subscription driver aborted"
                );
                SubscriptionExit::Failed(SubscriptionError::DriverAborted {
                    subscription_id: self.shared.subscription_id.clone(),
                })
            }
        }
    }

    /// Stop, then wait for in-flight deliveries to settle.
    pub async fn shutdown(self) -> StatsSnapshot {
        self.stop();
        let shared = Arc::clone(&self.shared);
        let _ = self.join().await;
        shared.stats.snapshot()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shared.stop();
    }
}
