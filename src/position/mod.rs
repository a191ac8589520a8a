//! Position and gap tracking.
//!
//! Records the last global position consumed by a subscription and compares
//! it with the log's tip. Purely observational: nothing here can block or
//! change delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::observe::SubscriptionObserver;

/// Reads the current tip (last global position) of the log.
#[async_trait]
pub trait TipReader: Send + Sync {
    async fn read_tip(&self) -> Result<u64, TransportError>;
}

/// One gap measurement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GapMeasure {
    pub subscription_id: String,
    pub last_seen: Option<u64>,
    pub tip: Option<u64>,
    /// `tip - last_seen`, when both are known.
    pub gap: Option<u64>,
    /// The tip query failed; `tip` and `gap` are from an earlier measurement.
    pub stale: bool,
}

const NOTHING_SEEN: u64 = u64::MAX;

/// Tracks the last consumed position of one subscription.
///
/// Cloning shares the same tracker.
#[derive(Clone)]
pub struct GapTracker {
    subscription_id: Arc<str>,
    last_seen: Arc<AtomicU64>,
    last_measure: Arc<Mutex<Option<GapMeasure>>>,
}

impl GapTracker {
    pub fn new(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            last_seen: Arc::new(AtomicU64::new(NOTHING_SEEN)),
            last_measure: Arc::new(Mutex::new(None)),
        }
    }

    /// Record a consumed position.
    ///
    /// Keeps the maximum, so the tracked value never decreases even when
    /// concurrently delivered events complete out of order.
    pub fn record(&self, global_position: u64) {
        let mut current = self.last_seen.load(Ordering::Acquire);
        loop {
            if current != NOTHING_SEEN && current >= global_position {
                return;
            }
            match self.last_seen.compare_exchange_weak(
                current,
                global_position,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn last_seen(&self) -> Option<u64> {
        match self.last_seen.load(Ordering::Acquire) {
            NOTHING_SEEN => None,
            position => Some(position),
        }
    }

    /// The most recent measurement, if any.
    pub fn last_measure(&self) -> Option<GapMeasure> {
        self.last_measure.lock().clone()
    }

    /// Query the tip and compute the gap.
    ///
    /// A failing tip query reports the previous tip marked stale (or an
    /// unknown gap when there is none) instead of returning an error.
    pub async fn measure(&self, reader: &dyn TipReader) -> GapMeasure {
        let last_seen = self.last_seen();
        let measure = match reader.read_tip().await {
            Ok(tip) => GapMeasure {
                subscription_id: self.subscription_id.to_string(),
                last_seen,
                tip: Some(tip),
                gap: Some(match last_seen {
                    Some(seen) => tip.saturating_sub(seen),
                    None => tip.saturating_add(1),
                }),
                stale: false,
            },
            Err(err) => {
                tracing::debug!(
                    subscription_id = %self.subscription_id,
                    error = %err,
                    "tip query failed, reporting stale gap"
                );
                let previous = self.last_measure.lock().clone();
                GapMeasure {
                    subscription_id: self.subscription_id.to_string(),
                    last_seen,
                    tip: previous.as_ref().and_then(|m| m.tip),
                    gap: previous.and_then(|m| m.gap),
                    stale: true,
                }
            }
        };
        *self.last_measure.lock() = Some(measure.clone());
        measure
    }

    /// Measure periodically and report to `observer` until `cancel` fires.
    pub fn spawn_monitor(
        &self,
        reader: Arc<dyn TipReader>,
        observer: Arc<dyn SubscriptionObserver>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let measure = tracker.measure(reader.as_ref()).await;
                        observer.gap(&measure);
                    }
                }
            }
        })
    }
}
