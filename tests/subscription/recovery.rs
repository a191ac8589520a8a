//! Drops and resubscription.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sourced_subscriptions::{
    DropReason, FixedRetry, HandlerPipeline, InMemoryPersistentStore, SubscriptionError,
    SubscriptionExit, SubscriptionOptions, SubscriptionState, TransportError,
};

use crate::support::{
    append_orders, eventually, subscription, BlockingHandler, CallLog, RecordingHandler,
    RecordingObserver, SUBSCRIPTION,
};

#[tokio::test]
async fn client_initiated_drop_is_silent() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();
    let calls_before = store.subscribe_calls();

    assert!(store.drop_connection(SUBSCRIPTION, DropReason::ClientInitiated).await);
    let exit = handle.join().await;

    assert!(exit.is_stopped());
    assert_eq!(store.subscribe_calls(), calls_before);
    assert!(observer.dropped.lock().is_empty());
    assert!(observer.failed.lock().is_empty());
}

#[tokio::test]
async fn server_drops_are_reported_and_resubscribed() {
    for reason in [
        DropReason::ServerShutdown,
        DropReason::ConsumerTooSlow,
        DropReason::NetworkError,
    ] {
        let store = InMemoryPersistentStore::new();
        let observer = Arc::new(RecordingObserver::default());
        let calls = CallLog::default();
        let pipeline = HandlerPipeline::builder()
            .handler(RecordingHandler::new("H1", &calls))
            .build();

        let handle = subscription(&store, pipeline, &observer).start().await.unwrap();
        let first = append_orders(&store, &["Created"]);
        eventually(|| store.acked(SUBSCRIPTION) == first).await;

        assert!(store.drop_connection(SUBSCRIPTION, reason).await);
        eventually(|| handle.stats().reattachments == 1).await;

        let dropped = observer.dropped.lock().clone();
        assert_eq!(dropped.len(), 1, "{reason}");
        assert_eq!(dropped[0].reason, reason);
        assert_eq!(dropped[0].last_position, Some(0));
        assert_eq!(handle.state(), SubscriptionState::Attached);

        // Delivery continues on the new attachment.
        let second = append_orders(&store, &["Shipped"]);
        eventually(|| store.acked(SUBSCRIPTION).ends_with(&second)).await;

        let stats = handle.shutdown().await;
        assert_eq!(stats.drops, 1);
        assert_eq!(observer.attached.lock().len(), 2);
    }
}

#[tokio::test]
async fn unacknowledged_events_are_redelivered_after_a_drop() {
    let store = InMemoryPersistentStore::new();
    let ids = append_orders(&store, &["Created"]);
    let observer = Arc::new(RecordingObserver::default());
    let started = Arc::new(AtomicUsize::new(0));
    let pipeline = HandlerPipeline::builder()
        .handler(BlockingHandler {
            started: Arc::clone(&started),
        })
        .build();

    let handle = subscription(&store, pipeline, &observer).start().await.unwrap();
    eventually(|| started.load(Ordering::SeqCst) == 1).await;

    store.drop_connection(SUBSCRIPTION, DropReason::ServerShutdown).await;

    // The blocked delivery is abandoned and the event comes back.
    eventually(|| started.load(Ordering::SeqCst) == 2).await;
    eventually(|| handle.stats().abandoned == 1).await;
    assert!(store.acked(SUBSCRIPTION).is_empty());
    assert!(store.nacked(SUBSCRIPTION).is_empty());
    assert_eq!(store.group_info(SUBSCRIPTION).unwrap().in_flight, ids.len());
    handle.shutdown().await;
}

#[tokio::test]
async fn drop_is_seen_while_every_permit_is_taken() {
    let store = InMemoryPersistentStore::new();
    let ids = append_orders(&store, &["Created", "Shipped", "Paid", "Packed", "Sent"]);
    let observer = Arc::new(RecordingObserver::default());
    let started = Arc::new(AtomicUsize::new(0));
    let pipeline = HandlerPipeline::builder()
        .handler(BlockingHandler {
            started: Arc::clone(&started),
        })
        .build();

    let handle = subscription(&store, pipeline, &observer)
        .with_options(
            SubscriptionOptions::new()
                .with_auto_ack(true)
                .with_buffer_size(1),
        )
        .start()
        .await
        .unwrap();

    // One delivery holds the only permit while the server pushes the rest.
    eventually(|| started.load(Ordering::SeqCst) == 1).await;
    eventually(|| store.acked(SUBSCRIPTION).len() == ids.len()).await;

    let dropped = tokio::time::timeout(
        Duration::from_secs(2),
        store.drop_connection(SUBSCRIPTION, DropReason::ServerShutdown),
    )
    .await;
    assert_eq!(dropped.ok(), Some(true));

    eventually(|| handle.stats().reattachments == 1).await;
    eventually(|| handle.stats().abandoned == ids.len()).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(observer.dropped.lock().len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn deleted_subscription_is_recreated() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();
    assert_eq!(store.create_calls(), 1);

    assert!(store.delete_subscription(SUBSCRIPTION).await);
    eventually(|| handle.stats().reattachments == 1).await;

    assert_eq!(store.create_calls(), 2);
    assert!(store.subscription_exists(SUBSCRIPTION));
    assert!(store.group_info(SUBSCRIPTION).unwrap().connected);
    assert_eq!(
        observer.dropped.lock()[0].reason,
        DropReason::SubscriptionDeleted
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn failed_resubscribe_is_fatal_without_a_retry_policy() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());
    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();

    store.fail_next_subscribe(TransportError::Unavailable("connection refused".into()));
    store.drop_connection(SUBSCRIPTION, DropReason::ServerShutdown).await;

    eventually(|| handle.state() == SubscriptionState::Failed).await;
    assert!(handle.is_stopped());

    let exit = handle.join().await;
    match exit {
        SubscriptionExit::Failed(SubscriptionError::Resubscribe {
            subscription_id,
            attempts,
            ..
        }) => {
            assert_eq!(subscription_id, SUBSCRIPTION);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected exit: {other:?}"),
    }

    let failed = observer.failed.lock();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, Some(DropReason::ServerShutdown));
    assert!(failed[0].error.contains("connection refused"));
}

#[tokio::test]
async fn retry_policy_recovers_from_transient_failures() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());
    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .with_retry_policy(FixedRetry::new(3, Duration::from_millis(5)))
        .start()
        .await
        .unwrap();
    let calls_before = store.subscribe_calls();

    store.fail_next_subscribe(TransportError::Unavailable("refused".into()));
    store.fail_next_subscribe(TransportError::Unavailable("refused".into()));
    store.drop_connection(SUBSCRIPTION, DropReason::NetworkError).await;

    eventually(|| handle.stats().reattachments == 1).await;
    assert_eq!(store.subscribe_calls(), calls_before + 3);
    assert!(observer.failed.lock().is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn retry_policy_gives_up_after_its_attempts() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());
    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .with_retry_policy(FixedRetry::new(2, Duration::from_millis(5)))
        .start()
        .await
        .unwrap();

    for _ in 0..2 {
        store.fail_next_subscribe(TransportError::Unavailable("refused".into()));
    }
    store.drop_connection(SUBSCRIPTION, DropReason::ServerShutdown).await;

    let exit = handle.join().await;
    assert!(matches!(
        exit.error(),
        Some(SubscriptionError::Resubscribe { attempts: 2, .. })
    ));
    assert_eq!(observer.failed.lock().len(), 1);
}

#[tokio::test]
async fn stop_during_retry_backoff_ends_quietly() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());
    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .with_retry_policy(FixedRetry::new(10, Duration::from_secs(60)))
        .start()
        .await
        .unwrap();

    store.fail_next_subscribe(TransportError::Unavailable("refused".into()));
    store.drop_connection(SUBSCRIPTION, DropReason::ServerShutdown).await;
    eventually(|| matches!(handle.state(), SubscriptionState::Reattaching { .. })).await;

    handle.stop();
    let exit = handle.join().await;
    assert!(exit.is_stopped());
    assert!(observer.failed.lock().is_empty());
}
