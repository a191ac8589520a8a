use std::sync::atomic::{AtomicUsize, Ordering};

/// Live delivery counters of one subscription.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    handled: AtomicUsize,
    ignored: AtomicUsize,
    failed: AtomicUsize,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    abandoned: AtomicUsize,
    drops: AtomicUsize,
    reattachments: AtomicUsize,
}

/// Point-in-time copy of [`SubscriptionStats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events at least one handler processed.
    pub handled: usize,
    /// Events no handler applied to.
    pub ignored: usize,
    /// Events whose pipeline failed.
    pub failed: usize,
    pub acked: usize,
    pub nacked: usize,
    /// Events whose ack/nack was skipped because the attachment had ended.
    pub abandoned: usize,
    /// Drops observed, client-initiated ones excluded.
    pub drops: usize,
    /// Successful resubscribes after a drop.
    pub reattachments: usize,
}

macro_rules! counter {
    ($($inc:ident => $field:ident),+ $(,)?) => {
        $(
            pub(crate) fn $inc(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )+
    };
}

impl SubscriptionStats {
    counter! {
        record_handled => handled,
        record_ignored => ignored,
        record_failed => failed,
        record_ack => acked,
        record_nack => nacked,
        record_abandoned => abandoned,
        record_drop => drops,
        record_reattach => reattachments,
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            reattachments: self.reattachments.load(Ordering::Relaxed),
        }
    }
}
