//! Shared document store holding the event catalog, its review
//! sub-collections and user profiles.
//!
//! Every session reads and writes the same store without locks. Counter and
//! RSVP mutations go through element-level atomic primitives so concurrent
//! writers never overwrite each other's change with a stale read.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::models::{Comment, Event, EventDraft, NewComment, Profile};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Stream of full catalog snapshots. The first item is the current state.
/// A transport failure is yielded once, after which the stream ends.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Event>, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {0} not found")]
    EventNotFound(Uuid),

    #[error("user {user} does not own event {event}")]
    NotOwner { event: Uuid, user: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// One step applied to an event's remaining-food counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryChange {
    Increment,
    Decrement,
}

impl InventoryChange {
    /// The counter never goes below zero; decrementing zero is a no-op.
    pub fn apply(self, count: u32) -> u32 {
        match self {
            InventoryChange::Increment => count.saturating_add(1),
            InventoryChange::Decrement => count.saturating_sub(1),
        }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Stores a new event owned by `owner`. The counter starts at zero and
    /// the RSVP set empty.
    async fn create_event(&self, owner: Uuid, draft: EventDraft) -> Result<Event, StoreError>;

    /// Replaces the descriptive fields of an event. Counter and RSVP set are
    /// left alone. Only the owner may do this.
    async fn replace_event(
        &self,
        id: Uuid,
        caller: Uuid,
        draft: EventDraft,
    ) -> Result<Event, StoreError>;

    /// Atomically applies `change` and returns the stored counter value.
    async fn adjust_food_counter(
        &self,
        id: Uuid,
        caller: Uuid,
        change: InventoryChange,
    ) -> Result<u32, StoreError>;

    async fn add_rsvp(&self, id: Uuid, contact: &str) -> Result<BTreeSet<String>, StoreError>;

    async fn remove_rsvp(&self, id: Uuid, contact: &str) -> Result<BTreeSet<String>, StoreError>;

    async fn watch(&self) -> Result<SnapshotStream, StoreError>;

    async fn add_comment(&self, event_id: Uuid, comment: NewComment)
        -> Result<Comment, StoreError>;

    async fn list_comments(&self, event_id: Uuid) -> Result<Vec<Comment>, StoreError>;

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError>;

    async fn put_profile(&self, profile: Profile) -> Result<Profile, StoreError>;
}

/// Opens the store selected by `STORE_BACKEND`.
pub async fn connect(config: &Config) -> Result<Arc<dyn EventStore>, StoreError> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_change_never_goes_negative() {
        assert_eq!(InventoryChange::Decrement.apply(0), 0);
        assert_eq!(InventoryChange::Decrement.apply(3), 2);
        assert_eq!(InventoryChange::Increment.apply(0), 1);
        assert_eq!(InventoryChange::Increment.apply(41), 42);
    }
}
