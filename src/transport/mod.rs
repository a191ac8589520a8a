//! Store transport - the client-facing contract of the external store.
//!
//! The engine depends on exactly four operations (attach, create, ack, nack)
//! plus an inbound channel carrying events and drop notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              PersistentSubscriptionClient                    │
//! │  subscribe(id, sink) -> LiveConnection | NotFound            │
//! │  create(id, settings) -> () | AlreadyExists                  │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LiveConnection                             │
//! │  ack(ref) / nack(ref, action, reason) / close()              │
//! └─────────────────────────────────────────────────────────────┘
//!                            │  ConnectionEvent::{Event, Dropped}
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EventSink                               │
//! │  bounded channel (capacity = buffer size) into the engine    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod client;
#[cfg(feature = "in-memory")]
mod in_memory;

pub use client::{
    event_channel, ConnectionEvent, DropReason, EventSink, EventSource, LiveConnection,
    NackAction, PersistentSubscriptionClient,
};
#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryPersistentStore, SubscriptionGroupInfo, LINK_EVENT_TYPE};
