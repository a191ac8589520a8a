//! Core transport traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::event::{EventRef, WireEvent};
use crate::subscription::{CreateSettings, Credentials, StreamSelector};

/// Why a live subscription connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// The server is shutting down or handing the group to another node.
    ServerShutdown,
    /// The client did not keep up with the server's buffer.
    ConsumerTooSlow,
    /// The persistent subscription was deleted on the server.
    SubscriptionDeleted,
    /// The connection failed.
    NetworkError,
    /// The client stopped the subscription itself.
    ClientInitiated,
}

impl DropReason {
    /// Client-initiated stops are terminal and silent.
    pub fn is_client_initiated(&self) -> bool {
        matches!(self, DropReason::ClientInitiated)
    }

    /// The cursor has to be recreated before attaching again.
    pub fn requires_recreate(&self) -> bool {
        matches!(self, DropReason::SubscriptionDeleted)
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropReason::ServerShutdown => "server shutdown",
            DropReason::ConsumerTooSlow => "consumer too slow",
            DropReason::SubscriptionDeleted => "subscription deleted",
            DropReason::NetworkError => "network error",
            DropReason::ClientInitiated => "client initiated",
        };
        f.write_str(name)
    }
}

/// Server-side action requested with a negative acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NackAction {
    /// Redeliver the event later.
    Retry,
    /// Drop the event without processing it.
    Skip,
    /// Move the event to the parked (dead-letter) stream.
    Park,
}

impl fmt::Display for NackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NackAction::Retry => "retry",
            NackAction::Skip => "skip",
            NackAction::Park => "park",
        };
        f.write_str(name)
    }
}

/// What the transport pushes into the engine.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// An inbound event.
    Event(WireEvent),
    /// The connection ended.
    Dropped {
        reason: DropReason,
        error: Option<TransportError>,
    },
}

/// Sending half handed to the transport on attach.
pub type EventSink = mpsc::Sender<ConnectionEvent>;

/// Receiving half owned by the engine.
pub type EventSource = mpsc::Receiver<ConnectionEvent>;

/// Create the bounded channel between a transport and the engine.
///
/// The capacity bounds how many events the transport may have queued
/// towards the engine before its sends start waiting.
pub fn event_channel(buffer_size: usize) -> (EventSink, EventSource) {
    mpsc::channel(buffer_size.max(1))
}

/// One live attachment to a persistent subscription.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Acknowledge that an event has been processed.
    async fn ack(&self, event: &EventRef) -> Result<(), TransportError>;

    /// Reject an event with the given server-side action.
    async fn nack(
        &self,
        event: &EventRef,
        action: NackAction,
        reason: &str,
    ) -> Result<(), TransportError>;

    /// Release the underlying transport resource.
    ///
    /// The engine guarantees a single call per connection.
    fn close(&self);
}

/// Client side of a store exposing server-managed subscriptions.
///
/// Implementations might include:
/// - `InMemoryPersistentStore` - For testing and single-process scenarios
/// - gRPC clients for event stores with persistent subscriptions
#[async_trait]
pub trait PersistentSubscriptionClient: Send + Sync {
    /// Attach to an existing subscription group.
    ///
    /// Returns `TransportError::NotFound` when the group does not exist.
    /// Events and drop notifications are pushed into `sink`. With `auto_ack`
    /// the server counts each event as acknowledged once it is dispatched;
    /// the engine then only sends nacks.
    async fn subscribe(
        &self,
        subscription_id: &str,
        selector: &StreamSelector,
        buffer_size: usize,
        auto_ack: bool,
        credentials: Option<&Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn LiveConnection>, TransportError>;

    /// Create a subscription group.
    ///
    /// Returns `TransportError::AlreadyExists` when the group already exists.
    async fn create(
        &self,
        subscription_id: &str,
        selector: &StreamSelector,
        settings: &CreateSettings,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError>;
}
