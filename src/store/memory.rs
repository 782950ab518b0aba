use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use super::{EventStore, InventoryChange, SnapshotStream, StoreError};
use crate::models::{Comment, Event, EventDraft, NewComment, Profile};

#[derive(Default)]
struct Inner {
    events: BTreeMap<Uuid, Event>,
    comments: HashMap<Uuid, Vec<Comment>>,
    profiles: HashMap<Uuid, Profile>,
}

/// Process-local store. Every event mutation publishes a fresh full snapshot
/// to all watchers.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    snapshots: watch::Sender<Arc<Vec<Event>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Mutex::new(Inner::default()),
            snapshots,
        }
    }

    /// Inserts or overwrites a complete event record as-is.
    pub fn seed(&self, event: Event) {
        let mut inner = self.inner.lock();
        inner.events.insert(event.id, event);
        self.publish(&inner);
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.snapshots.receiver_count()
    }

    fn publish(&self, inner: &Inner) {
        let snapshot: Vec<Event> = inner.events.values().cloned().collect();
        tracing::trace!(events = snapshot.len(), "Publishing catalog snapshot");
        self.snapshots.send_replace(Arc::new(snapshot));
    }

    fn update_event<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Event) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock();
        let event = inner
            .events
            .get_mut(&id)
            .ok_or(StoreError::EventNotFound(id))?;
        let out = f(event)?;
        event.updated_at = Utc::now();
        self.publish(&inner);
        Ok(out)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.inner.lock().events.values().cloned().collect())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.inner.lock().events.get(&id).cloned())
    }

    async fn create_event(&self, owner: Uuid, draft: EventDraft) -> Result<Event, StoreError> {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            owner_id: owner,
            hoster: draft.hoster,
            contact_email: draft.contact_email,
            name: draft.name,
            details: draft.details,
            location: draft.location,
            start_time: draft.start_time,
            end_time: draft.end_time,
            food_types: draft.food_types,
            food_counter: 0,
            rsvps: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock();
        inner.events.insert(event.id, event.clone());
        self.publish(&inner);
        Ok(event)
    }

    async fn replace_event(
        &self,
        id: Uuid,
        caller: Uuid,
        draft: EventDraft,
    ) -> Result<Event, StoreError> {
        self.update_event(id, |event| {
            if !event.is_owned_by(caller) {
                return Err(StoreError::NotOwner {
                    event: id,
                    user: caller,
                });
            }
            event.hoster = draft.hoster;
            event.contact_email = draft.contact_email;
            event.name = draft.name;
            event.details = draft.details;
            event.location = draft.location;
            event.start_time = draft.start_time;
            event.end_time = draft.end_time;
            event.food_types = draft.food_types;
            Ok(())
        })?;

        self.get_event(id)
            .await?
            .ok_or(StoreError::EventNotFound(id))
    }

    async fn adjust_food_counter(
        &self,
        id: Uuid,
        caller: Uuid,
        change: InventoryChange,
    ) -> Result<u32, StoreError> {
        self.update_event(id, |event| {
            if !event.is_owned_by(caller) {
                return Err(StoreError::NotOwner {
                    event: id,
                    user: caller,
                });
            }
            event.food_counter = change.apply(event.food_counter);
            Ok(event.food_counter)
        })
    }

    async fn add_rsvp(&self, id: Uuid, contact: &str) -> Result<BTreeSet<String>, StoreError> {
        self.update_event(id, |event| {
            event.rsvps.insert(contact.to_string());
            Ok(event.rsvps.clone())
        })
    }

    async fn remove_rsvp(&self, id: Uuid, contact: &str) -> Result<BTreeSet<String>, StoreError> {
        self.update_event(id, |event| {
            event.rsvps.remove(contact);
            Ok(event.rsvps.clone())
        })
    }

    async fn watch(&self) -> Result<SnapshotStream, StoreError> {
        let receiver = self.snapshots.subscribe();
        let stream = WatchStream::new(receiver).map(|snapshot| Ok(snapshot.as_ref().clone()));
        Ok(stream.boxed())
    }

    async fn add_comment(
        &self,
        event_id: Uuid,
        comment: NewComment,
    ) -> Result<Comment, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.events.contains_key(&event_id) {
            return Err(StoreError::EventNotFound(event_id));
        }

        let stored = Comment {
            id: Uuid::new_v4(),
            event_id,
            user_id: comment.user_id,
            username: comment.username,
            body: comment.body,
            rating: comment.rating,
            created_at: Utc::now(),
        };
        inner
            .comments
            .entry(event_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_comments(&self, event_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        let inner = self.inner.lock();
        if !inner.events.contains_key(&event_id) {
            return Err(StoreError::EventNotFound(event_id));
        }
        Ok(inner.comments.get(&event_id).cloned().unwrap_or_default())
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.inner.lock().profiles.get(&user_id).cloned())
    }

    async fn put_profile(&self, mut profile: Profile) -> Result<Profile, StoreError> {
        profile.updated_at = Utc::now();
        self.inner
            .lock()
            .profiles
            .insert(profile.user_id, profile.clone());
        Ok(profile)
    }
}
