//! RSVP membership of a viewer in an event's attendee set.
//!
//! A toggle reads the current membership, then adds or removes just this
//! viewer's contact through the store's element-level primitives. Other
//! viewers toggling at the same time never clobber each other's entries.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::models::Event;
use crate::store::EventStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpOutcome {
    Added,
    Removed,
}

impl RsvpOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            RsvpOutcome::Added => "You have successfully RSVPed.",
            RsvpOutcome::Removed => "You have removed your RSVP.",
        }
    }
}

/// Per event, per viewer. Starts from whatever the first read shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpState {
    NotRsvpd,
    Rsvpd,
}

impl RsvpState {
    pub fn of(event: &Event, contact: &str) -> Self {
        if event.has_rsvp(contact) {
            RsvpState::Rsvpd
        } else {
            RsvpState::NotRsvpd
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            RsvpState::NotRsvpd => RsvpState::Rsvpd,
            RsvpState::Rsvpd => RsvpState::NotRsvpd,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RsvpToggle {
    pub outcome: RsvpOutcome,
    pub state: RsvpState,
    pub rsvps: BTreeSet<String>,
}

#[derive(Clone)]
pub struct AttendanceRegistry {
    store: Arc<dyn EventStore>,
}

impl AttendanceRegistry {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn toggle_rsvp(&self, event_id: Uuid, contact: &str) -> Result<RsvpToggle, AppError> {
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(AppError::AuthError("You must sign in to RSVP.".to_string()));
        }

        let event = self.fetch(event_id).await?;
        let (outcome, rsvps) = match RsvpState::of(&event, contact) {
            RsvpState::Rsvpd => (
                RsvpOutcome::Removed,
                self.store.remove_rsvp(event_id, contact).await?,
            ),
            RsvpState::NotRsvpd => (
                RsvpOutcome::Added,
                self.store.add_rsvp(event_id, contact).await?,
            ),
        };

        let state = if rsvps.contains(contact) {
            RsvpState::Rsvpd
        } else {
            RsvpState::NotRsvpd
        };
        tracing::info!(event_id = %event_id, ?outcome, attendees = rsvps.len(), "RSVP toggled");

        Ok(RsvpToggle {
            outcome,
            state,
            rsvps,
        })
    }

    async fn fetch(&self, event_id: Uuid) -> Result<Event, AppError> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", event_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures::event;
    use crate::store::MemoryStore;

    async fn setup(rsvps: &[&str]) -> (Arc<MemoryStore>, AttendanceRegistry, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let mut seeded = event("Brunch", Uuid::new_v4(), 1_000);
        seeded.rsvps = rsvps.iter().map(|c| c.to_string()).collect();
        let id = seeded.id;
        store.seed(seeded);
        let registry = AttendanceRegistry::new(store.clone());
        (store, registry, id)
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_membership() {
        let (store, registry, id) = setup(&["x@bu.edu"]).await;
        let original = store.get_event(id).await.unwrap().unwrap().rsvps;

        let first = registry.toggle_rsvp(id, "me@bu.edu").await.unwrap();
        assert_eq!(first.outcome, RsvpOutcome::Added);
        assert_eq!(first.state, RsvpState::Rsvpd);

        let second = registry.toggle_rsvp(id, "me@bu.edu").await.unwrap();
        assert_eq!(second.outcome, RsvpOutcome::Removed);
        assert_eq!(second.state, RsvpState::NotRsvpd);

        assert_eq!(store.get_event(id).await.unwrap().unwrap().rsvps, original);
    }

    #[tokio::test]
    async fn test_initial_state_comes_from_first_read() {
        let (store, registry, id) = setup(&["me@bu.edu"]).await;
        let seeded = store.get_event(id).await.unwrap().unwrap();
        assert_eq!(RsvpState::of(&seeded, "me@bu.edu"), RsvpState::Rsvpd);
        assert_eq!(RsvpState::of(&seeded, "other@bu.edu"), RsvpState::NotRsvpd);

        let toggled = registry.toggle_rsvp(id, "me@bu.edu").await.unwrap();
        assert_eq!(toggled.outcome, RsvpOutcome::Removed);
        assert_eq!(RsvpState::Rsvpd.toggled(), toggled.state);
    }

    #[tokio::test]
    async fn test_concurrent_viewers_keep_both_entries() {
        let (store, registry, id) = setup(&[]).await;
        let other = registry.clone();

        let (a, b) = tokio::join!(
            registry.toggle_rsvp(id, "a@bu.edu"),
            other.toggle_rsvp(id, "b@bu.edu")
        );
        assert_eq!(a.unwrap().outcome, RsvpOutcome::Added);
        assert_eq!(b.unwrap().outcome, RsvpOutcome::Added);

        let rsvps = store.get_event(id).await.unwrap().unwrap().rsvps;
        assert!(rsvps.contains("a@bu.edu") && rsvps.contains("b@bu.edu"));
    }

    #[tokio::test]
    async fn test_missing_event_and_contact() {
        let (_store, registry, id) = setup(&[]).await;

        let missing = registry.toggle_rsvp(Uuid::new_v4(), "me@bu.edu").await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let anonymous = registry.toggle_rsvp(id, "  ").await;
        assert!(matches!(anonymous, Err(AppError::AuthError(_))));
    }

    #[test]
    fn test_outcome_copy() {
        assert_eq!(RsvpOutcome::Added.message(), "You have successfully RSVPed.");
        assert_eq!(RsvpOutcome::Removed.message(), "You have removed your RSVP.");
    }
}
