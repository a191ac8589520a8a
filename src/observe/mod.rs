//! Observability sink and delivery statistics.

mod stats;

pub use stats::{StatsSnapshot, SubscriptionStats};

use crate::position::GapMeasure;
use crate::transport::DropReason;

/// A reported (non client-initiated) drop.
#[derive(Clone, Debug)]
pub struct DropReport {
    pub subscription_id: String,
    pub reason: DropReason,
    /// Rendered transport error, when the transport supplied one.
    pub error: Option<String>,
    pub last_position: Option<u64>,
}

/// A subscription-level fatal error, reported once.
#[derive(Clone, Debug)]
pub struct FatalReport {
    pub subscription_id: String,
    pub last_position: Option<u64>,
    pub reason: Option<DropReason>,
    pub error: String,
}

/// Receives subscription lifecycle notifications and gap measurements.
///
/// Implementations must not block; nothing they do affects control flow.
pub trait SubscriptionObserver: Send + Sync {
    fn attached(&self, _subscription_id: &str) {}

    fn dropped(&self, _report: &DropReport) {}

    fn gap(&self, _measure: &GapMeasure) {}

    fn failed(&self, _report: &FatalReport) {}
}

/// Observer that logs through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl SubscriptionObserver for TracingObserver {
    fn attached(&self, subscription_id: &str) {
        tracing::info!(subscription_id, "subscription attached");
    }

    fn dropped(&self, report: &DropReport) {
        tracing::warn!(
            subscription_id = %report.subscription_id,
            reason = %report.reason,
            error = report.error.as_deref().unwrap_or(""),
            last_position = ?report.last_position,
            "subscription dropped"
        );
    }

    fn gap(&self, measure: &GapMeasure) {
        tracing::debug!(
            subscription_id = %measure.subscription_id,
            last_seen = ?measure.last_seen,
            tip = ?measure.tip,
            gap = ?measure.gap,
            stale = measure.stale,
            "subscription gap"
        );
    }

    fn failed(&self, report: &FatalReport) {
        tracing::error!(
            subscription_id = %report.subscription_id,
            last_position = ?report.last_position,
            reason = ?report.reason,
            error = %report.error,
            "subscription failed"
        );
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl SubscriptionObserver for NullObserver {}
