//! Start-up: attach, creating the cursor when it does not exist.

use std::sync::Arc;

use sourced_subscriptions::{
    AttachError, CreateSettings, Credentials, HandlerPipeline, InMemoryPersistentStore,
    PersistentSubscriptionClient, StartPosition, StreamSelector, SubscriptionOptions,
    SubscriptionState, TransportError,
};

use crate::support::{
    append_orders, eventually, subscription, RecordingObserver, STREAM, SUBSCRIPTION,
};

#[tokio::test]
async fn missing_cursor_is_created_once() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();

    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.subscribe_calls(), 2);
    assert!(store.subscription_exists(SUBSCRIPTION));
    assert_eq!(handle.subscription_id(), SUBSCRIPTION);
    assert_eq!(handle.state(), SubscriptionState::Attached);
    assert_eq!(*observer.attached.lock(), vec![SUBSCRIPTION.to_string()]);
    handle.shutdown().await;
}

#[tokio::test]
async fn existing_cursor_is_not_recreated() {
    let store = InMemoryPersistentStore::new();
    store
        .create(
            SUBSCRIPTION,
            &StreamSelector::stream(STREAM),
            &CreateSettings::default(),
            None,
        )
        .await
        .unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();

    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.subscribe_calls(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn losing_a_create_race_still_attaches() {
    let store = InMemoryPersistentStore::new();
    store
        .create(
            SUBSCRIPTION,
            &StreamSelector::stream(STREAM),
            &CreateSettings::default(),
            None,
        )
        .await
        .unwrap();
    // First attach sees the cursor missing; by the time we create, it exists.
    store.fail_next_subscribe(TransportError::NotFound(SUBSCRIPTION.into()));
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await
        .unwrap();

    assert_eq!(store.create_calls(), 2);
    assert_eq!(store.subscribe_calls(), 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn second_not_found_is_fatal() {
    let store = InMemoryPersistentStore::new();
    store.fail_next_subscribe(TransportError::NotFound(SUBSCRIPTION.into()));
    store.fail_next_subscribe(TransportError::NotFound(SUBSCRIPTION.into()));
    let observer = Arc::new(RecordingObserver::default());

    let result = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await;

    assert!(matches!(
        result,
        Err(AttachError::Attach {
            source: TransportError::NotFound(_),
            ..
        })
    ));
    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.subscribe_calls(), 2);
}

#[tokio::test]
async fn other_attach_errors_are_fatal_and_reported() {
    let store = InMemoryPersistentStore::new();
    store.fail_next_subscribe(TransportError::Unavailable("connection refused".into()));
    let observer = Arc::new(RecordingObserver::default());

    let result = subscription(&store, HandlerPipeline::default(), &observer)
        .start()
        .await;

    let err = result.err().unwrap();
    assert!(matches!(
        err.transport_error(),
        Some(TransportError::Unavailable(_))
    ));
    assert_eq!(store.create_calls(), 0);
    let failed = observer.failed.lock();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].subscription_id, SUBSCRIPTION);
    assert!(observer.attached.lock().is_empty());
}

#[tokio::test]
async fn zero_buffer_size_is_rejected() {
    let store = InMemoryPersistentStore::new();
    let observer = Arc::new(RecordingObserver::default());

    let result = subscription(&store, HandlerPipeline::default(), &observer)
        .with_options(SubscriptionOptions::new().with_buffer_size(0))
        .start()
        .await;

    assert!(matches!(result, Err(AttachError::InvalidOptions(_))));
    assert_eq!(store.subscribe_calls(), 0);
}

#[tokio::test]
async fn credentials_and_start_position_reach_the_server() {
    let credentials = Credentials::new("admin", "changeit");
    let store = InMemoryPersistentStore::new().with_credentials(credentials.clone());
    append_orders(&store, &["Created", "Shipped"]);
    let observer = Arc::new(RecordingObserver::default());

    let handle = subscription(&store, HandlerPipeline::default(), &observer)
        .with_options(
            SubscriptionOptions::new()
                .with_credentials(credentials)
                .with_start_from(StartPosition::End),
        )
        .start()
        .await
        .unwrap();

    let info = store.group_info(SUBSCRIPTION).unwrap();
    assert_eq!(info.settings.start_from, StartPosition::End);

    let ids = append_orders(&store, &["Delivered"]);
    eventually(|| store.acked(SUBSCRIPTION) == ids).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn options_load_from_json() {
    let options = SubscriptionOptions::from_json(
        r#"{ "buffer_size": 4, "auto_ack": true, "create": { "start_from": "end" } }"#,
    )
    .unwrap();
    assert_eq!(options.buffer_size, 4);
    assert!(options.auto_ack);
    assert_eq!(options.create.start_from, StartPosition::End);
    assert!(options.credentials.is_none());
}
