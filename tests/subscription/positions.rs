//! Position tracking, gap measurement and the in-flight bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sourced_subscriptions::{
    async_trait, CancellationToken, EventHandler, HandlerError, HandlerPipeline, HandlingStatus,
    InMemoryPersistentStore, ReceivedEvent, SubscriptionOptions,
};

use crate::support::{append_orders, eventually, subscription, RecordingObserver, SUBSCRIPTION};

#[derive(Clone, Default)]
struct PositionLog {
    positions: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl EventHandler for PositionLog {
    fn name(&self) -> &str {
        "positions"
    }

    async fn handle(
        &self,
        event: &ReceivedEvent,
        _cancel: &CancellationToken,
    ) -> Result<HandlingStatus, HandlerError> {
        self.positions.lock().push(event.global_position);
        Ok(HandlingStatus::Handled)
    }
}

#[derive(Clone, Default)]
struct Concurrency {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler for Concurrency {
    fn name(&self) -> &str {
        "slow"
    }

    async fn handle(
        &self,
        _event: &ReceivedEvent,
        _cancel: &CancellationToken,
    ) -> Result<HandlingStatus, HandlerError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(HandlingStatus::Handled)
    }
}

#[tokio::test]
async fn observed_positions_never_decrease() {
    let store = InMemoryPersistentStore::new();
    store.append("orders-2", "Created", Vec::new());
    append_orders(&store, &["Created", "Refunded", "Shipped"]);
    store.append("orders-2", "Shipped", Vec::new());
    append_orders(&store, &["Delivered"]);

    let log = PositionLog::default();
    let pipeline = HandlerPipeline::builder().handler(log.clone()).build();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, pipeline, &observer)
        .with_options(SubscriptionOptions::new().with_buffer_size(1))
        .start()
        .await
        .unwrap();

    eventually(|| log.positions.lock().len() == 4).await;
    assert_eq!(*log.positions.lock(), vec![1, 2, 3, 5]);
    assert_eq!(handle.last_position(), Some(5));
    handle.shutdown().await;
}

#[tokio::test]
async fn in_flight_events_are_bounded_by_buffer_size() {
    let store = InMemoryPersistentStore::new();
    let ids = append_orders(&store, &["Created"; 12]);

    let slow = Concurrency::default();
    let pipeline = HandlerPipeline::builder().handler(slow.clone()).build();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, pipeline, &observer)
        .with_options(SubscriptionOptions::new().with_buffer_size(3))
        .start()
        .await
        .unwrap();

    eventually(|| store.acked(SUBSCRIPTION).len() == ids.len()).await;
    let stats = handle.shutdown().await;

    assert_eq!(slow.done.load(Ordering::SeqCst), ids.len());
    assert!(slow.peak.load(Ordering::SeqCst) <= 3);
    assert!(slow.peak.load(Ordering::SeqCst) >= 2);
    assert_eq!(stats.acked, ids.len());
}

#[tokio::test]
async fn gap_monitor_reports_distance_to_tip() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .with_tip_reader(Arc::new(store.clone()), Duration::from_millis(10))
        .start()
        .await
        .unwrap();

    // Empty log: the tip query fails, delivery is unaffected.
    eventually(|| !observer.gaps.lock().is_empty()).await;
    let first = observer.gaps.lock()[0].clone();
    assert!(first.stale);
    assert_eq!(first.gap, None);
    assert_eq!(first.subscription_id, SUBSCRIPTION);

    append_orders(&store, &["Created", "Shipped"]);
    eventually(|| {
        observer
            .gaps
            .lock()
            .last()
            .is_some_and(|m| !m.stale && m.gap == Some(0))
    })
    .await;

    // Events on other streams move the tip but not this subscription.
    store.append("orders-2", "Created", Vec::new());
    eventually(|| {
        observer
            .gaps
            .lock()
            .last()
            .is_some_and(|m| m.gap == Some(1) && m.last_seen == Some(1))
    })
    .await;

    handle.shutdown().await;
}
