//! Stopping: idempotent, single dispose, in-flight work abandoned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sourced_subscriptions::{HandlerPipeline, InMemoryPersistentStore, SubscriptionState};

use crate::support::{
    append_orders, eventually, subscription, BlockingHandler, RecordingObserver, SUBSCRIPTION,
};

#[tokio::test]
async fn stop_twice_disposes_connection_once() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();

    handle.stop();
    handle.stop();
    assert!(handle.is_stopped());

    let exit = handle.join().await;
    assert!(exit.is_stopped());
    assert_eq!(store.closes(), 1);
    assert!(!store.group_info(SUBSCRIPTION).unwrap().connected);
    assert!(observer.dropped.lock().is_empty());
}

#[tokio::test]
async fn stopped_subscription_reports_stopped_state() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();
    handle.stop();

    eventually(|| handle.state() == SubscriptionState::Stopped).await;
    handle.shutdown().await;
    assert_eq!(store.closes(), 1);
}

#[tokio::test]
async fn stop_abandons_in_flight_events() {
    let store = InMemoryPersistentStore::new();
    let ids = append_orders(&store, &["Created", "Shipped"]);
    let started = Arc::new(AtomicUsize::new(0));
    let pipeline = HandlerPipeline::builder()
        .handler(BlockingHandler {
            started: Arc::clone(&started),
        })
        .build();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, pipeline, &observer).start().await.unwrap();

    eventually(|| started.load(Ordering::SeqCst) == 2).await;
    let stats = handle.shutdown().await;

    assert_eq!(stats.abandoned, 2);
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.nacked, 0);
    assert!(store.acked(SUBSCRIPTION).is_empty());
    assert!(store.nacked(SUBSCRIPTION).is_empty());

    // Unacknowledged events stay with the server for the next attachment.
    let info = store.group_info(SUBSCRIPTION).unwrap();
    assert_eq!(info.pending_retries, ids.len());
}

#[tokio::test]
async fn dropping_the_handle_stops_the_subscription() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();
    drop(handle);

    assert_eq!(store.closes(), 1);
    assert!(!store.group_info(SUBSCRIPTION).unwrap().connected);
}
