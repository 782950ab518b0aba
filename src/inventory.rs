//! Remaining-food counter for one event, editable by its host only.
//!
//! The local count moves first so the host sees the change immediately.
//! The store then applies the same step atomically and its answer replaces
//! the local value. A snapshot that is older than the local change may
//! briefly roll the local value back until a fresher one arrives.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::Event;
use crate::store::{EventStore, InventoryChange};
use crate::utils::error::AppError;

pub struct InventorySynchronizer {
    store: Arc<dyn EventStore>,
    event_id: Uuid,
    owner_id: Uuid,
    count: Mutex<u32>,
}

impl InventorySynchronizer {
    pub fn new(store: Arc<dyn EventStore>, event: &Event) -> Self {
        Self {
            store,
            event_id: event.id,
            owner_id: event.owner_id,
            count: Mutex::new(event.food_counter),
        }
    }

    pub async fn load(store: Arc<dyn EventStore>, event_id: Uuid) -> Result<Self, AppError> {
        let event = store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", event_id)))?;
        Ok(Self::new(store, &event))
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    /// Identity comparison only; display names never grant access.
    pub fn can_edit(&self, caller: Uuid) -> bool {
        caller == self.owner_id
    }

    /// Takes the counter from a catalog snapshot, if the event is in it.
    pub fn observe(&self, snapshot: &[Event]) {
        if let Some(event) = snapshot.iter().find(|event| event.id == self.event_id) {
            *self.count.lock() = event.food_counter;
        }
    }

    pub async fn increment(&self, caller: Uuid) -> Result<u32, AppError> {
        self.apply(caller, InventoryChange::Increment).await
    }

    /// Decrementing an empty counter changes nothing and writes nothing.
    pub async fn decrement(&self, caller: Uuid) -> Result<u32, AppError> {
        self.apply(caller, InventoryChange::Decrement).await
    }

    async fn apply(&self, caller: Uuid, change: InventoryChange) -> Result<u32, AppError> {
        if !self.can_edit(caller) {
            tracing::warn!(event_id = %self.event_id, caller = %caller, "Non-host tried to change food counter");
            return Err(AppError::Forbidden(
                "Only the host can change the food counter".to_string(),
            ));
        }

        let previous = {
            let mut count = self.count.lock();
            let previous = *count;
            if change == InventoryChange::Decrement && previous == 0 {
                return Ok(0);
            }
            *count = change.apply(previous);
            previous
        };

        match self
            .store
            .adjust_food_counter(self.event_id, caller, change)
            .await
        {
            Ok(stored) => {
                *self.count.lock() = stored;
                tracing::info!(event_id = %self.event_id, ?change, count = stored, "Food counter updated");
                Ok(stored)
            }
            Err(e) => {
                *self.count.lock() = previous;
                tracing::warn!(event_id = %self.event_id, error = %e, "Food counter write failed, rolled back");
                Err(e.into())
            }
        }
    }
}
