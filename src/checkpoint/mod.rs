//! Checkpoint persistence.
//!
//! Persistent subscriptions keep their position on the server, so the engine
//! defaults to [`NoOpCheckpointStore`]. Client-tracked subscription variants
//! plug in a real store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::BoxError;

/// Trait for checkpoint persistence. One position per subscription id (latest wins).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the stored position for a subscription.
    async fn load(&self, subscription_id: &str) -> Result<Option<u64>, BoxError>;

    /// Save (or overwrite) the position for a subscription.
    async fn store(&self, subscription_id: &str, position: u64) -> Result<(), BoxError>;
}

/// Checkpoint store that remembers nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpCheckpointStore;

#[async_trait]
impl CheckpointStore for NoOpCheckpointStore {
    async fn load(&self, _subscription_id: &str) -> Result<Option<u64>, BoxError> {
        Ok(None)
    }

    async fn store(&self, _subscription_id: &str, _position: u64) -> Result<(), BoxError> {
        Ok(())
    }
}

/// In-memory checkpoint store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage). Positions
/// only move forward: storing an older position keeps the newer one.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, for tests and diagnostics.
    pub fn get(&self, subscription_id: &str) -> Option<u64> {
        self.storage.read().get(subscription_id).copied()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, subscription_id: &str) -> Result<Option<u64>, BoxError> {
        Ok(self.get(subscription_id))
    }

    async fn store(&self, subscription_id: &str, position: u64) -> Result<(), BoxError> {
        let mut storage = self.storage.write();
        let entry = storage.entry(subscription_id.to_string()).or_insert(position);
        if position > *entry {
            *entry = position;
        }
        Ok(())
    }
}
