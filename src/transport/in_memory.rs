//! In-memory persistent-subscription store for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-memory event log with named
//! subscription groups, useful for:
//! - Unit and integration testing without an external store
//! - Single-process applications
//! - Development and prototyping

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::client::{
    ConnectionEvent, DropReason, EventSink, LiveConnection, NackAction,
    PersistentSubscriptionClient,
};
use crate::error::TransportError;
use crate::event::{EventRef, RecordedEvent, WireEvent};
use crate::position::TipReader;
use crate::subscription::{CreateSettings, Credentials, StartPosition, StreamSelector};

/// Event type of link entries.
pub const LINK_EVENT_TYPE: &str = "$>";

/// Snapshot of one subscription group, for assertions and diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionGroupInfo {
    pub selector: StreamSelector,
    pub settings: CreateSettings,
    pub connected: bool,
    pub in_flight: usize,
    pub pending_retries: usize,
    pub acked: Vec<String>,
    pub nacked: Vec<(String, NackAction, String)>,
    pub parked: Vec<String>,
}

struct Active {
    id: u64,
    sink: EventSink,
    cancel: CancellationToken,
    buffer_size: usize,
    auto_ack: bool,
}

/// A delivery slot: log index plus number of earlier attempts.
#[derive(Clone, Copy)]
struct Pending {
    index: usize,
    retry_count: u32,
}

struct Group {
    selector: StreamSelector,
    settings: CreateSettings,
    cursor: usize,
    retries: VecDeque<Pending>,
    in_flight: HashMap<String, Pending>,
    active: Option<Active>,
    acked: Vec<String>,
    nacked: Vec<(String, NackAction, String)>,
    parked: Vec<String>,
}

impl Group {
    /// Return in-flight events to the retry queue, oldest first.
    fn requeue_in_flight(&mut self) {
        let mut pending: Vec<Pending> = self.in_flight.drain().map(|(_, p)| p).collect();
        pending.sort_by_key(|p| std::cmp::Reverse(p.index));
        for p in pending {
            self.retries.push_front(Pending {
                index: p.index,
                retry_count: p.retry_count + 1,
            });
        }
    }

    fn info(&self) -> SubscriptionGroupInfo {
        SubscriptionGroupInfo {
            selector: self.selector.clone(),
            settings: self.settings.clone(),
            connected: self.active.is_some(),
            in_flight: self.in_flight.len(),
            pending_retries: self.retries.len(),
            acked: self.acked.clone(),
            nacked: self.nacked.clone(),
            parked: self.parked.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    log: Vec<RecordedEvent>,
    /// Link entry index -> target entry index.
    links: HashMap<usize, usize>,
    stream_versions: HashMap<String, u64>,
    groups: HashMap<String, Group>,
    subscribe_failures: VecDeque<TransportError>,
    create_failures: VecDeque<TransportError>,
    subscribe_calls: usize,
    create_calls: usize,
    closes: usize,
    next_connection: u64,
    credentials: Option<Credentials>,
}

impl State {
    fn push(
        &mut self,
        event_id: &str,
        stream_id: &str,
        event_type: &str,
        data: Vec<u8>,
    ) -> RecordedEvent {
        let version = self.stream_versions.entry(stream_id.to_string()).or_insert(0);
        let stream_position = *version;
        *version += 1;
        let event = RecordedEvent::new(
            event_id,
            stream_id,
            stream_position,
            self.log.len() as u64,
            event_type,
            data,
        );
        self.log.push(event.clone());
        event
    }

    fn check_credentials(&self, supplied: Option<&Credentials>) -> Result<(), TransportError> {
        match &self.credentials {
            Some(required) if supplied != Some(required) => {
                Err(TransportError::AccessDenied("invalid credentials".into()))
            }
            _ => Ok(()),
        }
    }

    fn start_cursor(&self, selector: &StreamSelector, start: StartPosition) -> usize {
        match (start, selector) {
            (StartPosition::Beginning, _) => 0,
            (StartPosition::End, _) => self.log.len(),
            (StartPosition::Position(p), StreamSelector::All) => {
                usize::try_from(p).unwrap_or(usize::MAX).min(self.log.len())
            }
            (StartPosition::Position(p), StreamSelector::Stream(stream)) => self
                .log
                .iter()
                .position(|e| &e.stream_id == stream && e.stream_position >= p)
                .unwrap_or(self.log.len()),
        }
    }

    /// Pick the next event for a connection, marking it in flight.
    fn next_for(&mut self, subscription_id: &str, connection_id: u64) -> Next {
        let State {
            log, links, groups, ..
        } = self;
        let Some(group) = groups.get_mut(subscription_id) else {
            return Next::Closed;
        };
        let (buffer_size, auto_ack) = match &group.active {
            Some(active) if active.id == connection_id => (active.buffer_size, active.auto_ack),
            _ => return Next::Closed,
        };
        if group.in_flight.len() >= buffer_size {
            return Next::Wait;
        }

        let pending = match group.retries.pop_front() {
            Some(pending) => Some(pending),
            None => {
                let found = log[group.cursor.min(log.len())..]
                    .iter()
                    .position(|e| group.selector.matches(&e.stream_id));
                match found {
                    Some(offset) => {
                        let index = group.cursor + offset;
                        group.cursor = index + 1;
                        Some(Pending {
                            index,
                            retry_count: 0,
                        })
                    }
                    None => {
                        group.cursor = log.len();
                        None
                    }
                }
            }
        };

        match pending {
            Some(pending) => {
                let entry = log[pending.index].clone();
                if auto_ack {
                    group.acked.push(entry.id.clone());
                } else {
                    group.in_flight.insert(entry.id.clone(), pending);
                }
                let wire = match links.get(&pending.index) {
                    Some(&target) if group.settings.resolve_link_tos => {
                        WireEvent::new(log[target].clone()).with_link(entry)
                    }
                    _ => WireEvent::new(entry),
                };
                Next::Event(wire.with_retry_count(pending.retry_count))
            }
            None => Next::Wait,
        }
    }
}

enum Next {
    Event(WireEvent),
    Wait,
    Closed,
}

struct Inner {
    state: Mutex<State>,
    changed: Notify,
}

/// In-memory store implementing [`PersistentSubscriptionClient`] and [`TipReader`].
///
/// Features:
/// - Thread-safe (can be shared across tasks via `Clone`)
/// - Append-only log with global and per-stream positions
/// - Named subscription groups with a server-side cursor, retry queue
///   and parked list
/// - Unacknowledged events are redelivered after a drop or close
/// - Link entries, resolved for groups created with `resolve_link_tos`
/// - Drop, deletion and failure injection for testing recovery paths
///
/// ## Example
///
/// ```
/// use sourced_subscriptions::InMemoryPersistentStore;
///
/// let store = InMemoryPersistentStore::new();
/// store.append("orders-1", "OrderCreated", br#"{"id":"o1"}"#.to_vec());
/// store.append("orders-1", "OrderShipped", br#"{"id":"o1"}"#.to_vec());
///
/// assert_eq!(store.len(), 2);
/// assert_eq!(store.event_types(), vec!["OrderCreated", "OrderShipped"]);
/// ```
#[derive(Clone)]
pub struct InMemoryPersistentStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryPersistentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Require these credentials on subscribe and create.
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        self.inner.state.lock().credentials = Some(credentials);
        self
    }

    /// Append an event with a generated id.
    pub fn append(&self, stream_id: &str, event_type: &str, data: Vec<u8>) -> RecordedEvent {
        self.append_with_id(&uuid::Uuid::new_v4().to_string(), stream_id, event_type, data)
    }

    /// Append an event with a caller-chosen id.
    pub fn append_with_id(
        &self,
        event_id: &str,
        stream_id: &str,
        event_type: &str,
        data: Vec<u8>,
    ) -> RecordedEvent {
        let event = self.inner.state.lock().push(event_id, stream_id, event_type, data);
        self.inner.changed.notify_waiters();
        event
    }

    /// Append a link to `target` onto `stream_id`, as a projection would.
    ///
    /// Groups created with `resolve_link_tos` receive the target with the link
    /// attached; others receive the raw link entry. Returns `None` when
    /// `target` is not in the log.
    pub fn append_link(&self, stream_id: &str, target: &RecordedEvent) -> Option<RecordedEvent> {
        let link = {
            let mut state = self.inner.state.lock();
            let target_index = usize::try_from(target.global_position).ok()?;
            if state.log.get(target_index).map(|e| &e.id) != Some(&target.id) {
                return None;
            }
            let data = format!("{}@{}", target.stream_position, target.stream_id).into_bytes();
            let link_id = uuid::Uuid::new_v4().to_string();
            let link = state.push(&link_id, stream_id, LINK_EVENT_TYPE, data);
            let link_index = state.log.len() - 1;
            state.links.insert(link_index, target_index);
            link
        };
        self.inner.changed.notify_waiters();
        Some(link)
    }

    /// Get all events in the log.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.inner.state.lock().log.clone()
    }

    /// Get all event types in order.
    pub fn event_types(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .log
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Get the total number of events in the log.
    pub fn len(&self) -> usize {
        self.inner.state.lock().log.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().log.is_empty()
    }

    pub fn subscription_exists(&self, subscription_id: &str) -> bool {
        self.inner.state.lock().groups.contains_key(subscription_id)
    }

    pub fn group_info(&self, subscription_id: &str) -> Option<SubscriptionGroupInfo> {
        self.inner
            .state
            .lock()
            .groups
            .get(subscription_id)
            .map(Group::info)
    }

    /// Acknowledged event ids of a group, in ack order.
    pub fn acked(&self, subscription_id: &str) -> Vec<String> {
        self.group_info(subscription_id)
            .map(|g| g.acked)
            .unwrap_or_default()
    }

    /// Negative acknowledgements of a group, in nack order.
    pub fn nacked(&self, subscription_id: &str) -> Vec<(String, NackAction, String)> {
        self.group_info(subscription_id)
            .map(|g| g.nacked)
            .unwrap_or_default()
    }

    /// Parked event ids of a group.
    pub fn parked(&self, subscription_id: &str) -> Vec<String> {
        self.group_info(subscription_id)
            .map(|g| g.parked)
            .unwrap_or_default()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.state.lock().subscribe_calls
    }

    pub fn create_calls(&self) -> usize {
        self.inner.state.lock().create_calls
    }

    /// Number of connections closed by their client.
    pub fn closes(&self) -> usize {
        self.inner.state.lock().closes
    }

    /// Make the next subscribe call fail with `error`.
    pub fn fail_next_subscribe(&self, error: TransportError) {
        self.inner.state.lock().subscribe_failures.push_back(error);
    }

    /// Make the next create call fail with `error`.
    pub fn fail_next_create(&self, error: TransportError) {
        self.inner.state.lock().create_failures.push_back(error);
    }

    /// Drop the live connection of a group, as the server would.
    ///
    /// In-flight events go back to the retry queue. Returns false when the
    /// group has no live connection.
    pub async fn drop_connection(&self, subscription_id: &str, reason: DropReason) -> bool {
        let active = {
            let mut state = self.inner.state.lock();
            let Some(group) = state.groups.get_mut(subscription_id) else {
                return false;
            };
            let active = group.active.take();
            group.requeue_in_flight();
            active
        };
        self.inner.changed.notify_waiters();

        match active {
            Some(active) => {
                notify_dropped(active, reason).await;
                true
            }
            None => false,
        }
    }

    /// Delete a group; its live connection is dropped with `SubscriptionDeleted`.
    pub async fn delete_subscription(&self, subscription_id: &str) -> bool {
        let removed = self.inner.state.lock().groups.remove(subscription_id);
        self.inner.changed.notify_waiters();

        match removed {
            Some(group) => {
                if let Some(active) = group.active {
                    notify_dropped(active, DropReason::SubscriptionDeleted).await;
                }
                true
            }
            None => false,
        }
    }

    fn spawn_feeder(
        &self,
        subscription_id: String,
        connection_id: u64,
        sink: EventSink,
        cancel: CancellationToken,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let notified = inner.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let next = inner.state.lock().next_for(&subscription_id, connection_id);
                match next {
                    Next::Event(wire) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            sent = sink.send(ConnectionEvent::Event(wire)) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Next::Wait => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = &mut notified => {}
                        }
                    }
                    Next::Closed => break,
                }
            }
        });
    }
}

async fn notify_dropped(active: Active, reason: DropReason) {
    active.cancel.cancel();
    let error = match reason {
        DropReason::NetworkError => Some(TransportError::Unavailable("connection reset".into())),
        _ => None,
    };
    let _ = active
        .sink
        .send(ConnectionEvent::Dropped { reason, error })
        .await;
}

#[async_trait]
impl PersistentSubscriptionClient for InMemoryPersistentStore {
    async fn subscribe(
        &self,
        subscription_id: &str,
        _selector: &StreamSelector,
        buffer_size: usize,
        auto_ack: bool,
        credentials: Option<&Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn LiveConnection>, TransportError> {
        let (connection_id, cancel, replaced) = {
            let mut state = self.inner.state.lock();
            state.subscribe_calls += 1;
            if let Some(err) = state.subscribe_failures.pop_front() {
                return Err(err);
            }
            state.check_credentials(credentials)?;
            state.next_connection += 1;
            let connection_id = state.next_connection;

            let group = state
                .groups
                .get_mut(subscription_id)
                .ok_or_else(|| TransportError::NotFound(subscription_id.to_string()))?;
            let cancel = CancellationToken::new();
            let replaced = group.active.replace(Active {
                id: connection_id,
                sink: sink.clone(),
                cancel: cancel.clone(),
                buffer_size: buffer_size.max(1),
                auto_ack,
            });
            if replaced.is_some() {
                group.requeue_in_flight();
            }
            (connection_id, cancel, replaced)
        };
        if let Some(previous) = replaced {
            previous.cancel.cancel();
        }

        self.spawn_feeder(subscription_id.to_string(), connection_id, sink, cancel.clone());
        self.inner.changed.notify_waiters();

        Ok(Arc::new(InMemoryConnection {
            inner: Arc::clone(&self.inner),
            subscription_id: subscription_id.to_string(),
            connection_id,
            cancel,
        }))
    }

    async fn create(
        &self,
        subscription_id: &str,
        selector: &StreamSelector,
        settings: &CreateSettings,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        state.create_calls += 1;
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        state.check_credentials(credentials)?;
        if state.groups.contains_key(subscription_id) {
            return Err(TransportError::AlreadyExists(subscription_id.to_string()));
        }
        let cursor = state.start_cursor(selector, settings.start_from);
        state.groups.insert(
            subscription_id.to_string(),
            Group {
                selector: selector.clone(),
                settings: settings.clone(),
                cursor,
                retries: VecDeque::new(),
                in_flight: HashMap::new(),
                active: None,
                acked: Vec::new(),
                nacked: Vec::new(),
                parked: Vec::new(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl TipReader for InMemoryPersistentStore {
    async fn read_tip(&self) -> Result<u64, TransportError> {
        match self.inner.state.lock().log.last() {
            Some(event) => Ok(event.global_position),
            None => Err(TransportError::NotFound("$all is empty".into())),
        }
    }
}

struct InMemoryConnection {
    inner: Arc<Inner>,
    subscription_id: String,
    connection_id: u64,
    cancel: CancellationToken,
}

impl InMemoryConnection {
    /// Run `f` on the group if this connection is still its live one.
    fn with_group<T>(&self, f: impl FnOnce(&mut Group) -> T) -> Result<T, TransportError> {
        let result = {
            let mut state = self.inner.state.lock();
            match state.groups.get_mut(&self.subscription_id) {
                Some(group)
                    if group.active.as_ref().map(|a| a.id) == Some(self.connection_id) =>
                {
                    Ok(f(group))
                }
                _ => Err(TransportError::Closed),
            }
        };
        self.inner.changed.notify_waiters();
        result
    }
}

#[async_trait]
impl LiveConnection for InMemoryConnection {
    async fn ack(&self, event: &EventRef) -> Result<(), TransportError> {
        self.with_group(|group| {
            if group.in_flight.remove(&event.event_id).is_some() {
                group.acked.push(event.event_id.clone());
            }
        })
    }

    async fn nack(
        &self,
        event: &EventRef,
        action: NackAction,
        reason: &str,
    ) -> Result<(), TransportError> {
        self.with_group(|group| {
            let Some(pending) = group.in_flight.remove(&event.event_id) else {
                return;
            };
            group
                .nacked
                .push((event.event_id.clone(), action, reason.to_string()));
            match action {
                NackAction::Retry => group.retries.push_back(Pending {
                    index: pending.index,
                    retry_count: pending.retry_count + 1,
                }),
                NackAction::Park => group.parked.push(event.event_id.clone()),
                NackAction::Skip => {}
            }
        })
    }

    fn close(&self) {
        self.cancel.cancel();
        {
            let mut state = self.inner.state.lock();
            state.closes += 1;
            if let Some(group) = state.groups.get_mut(&self.subscription_id) {
                if group.active.as_ref().map(|a| a.id) == Some(self.connection_id) {
                    group.active = None;
                    group.requeue_in_flight();
                }
            }
        }
        self.inner.changed.notify_waiters();
    }
}
