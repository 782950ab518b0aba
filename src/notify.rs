//! "Starting soon" alerts.
//!
//! Each viewing session decides on its own, from the latest catalog
//! snapshot, which events to announce. A [`NotificationRecord`] lives exactly
//! as long as one catalog subscription and guarantees an event id is
//! announced at most once within it. A new session starts with an empty
//! record and may announce the same events again.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::catalog::{CatalogSource, CatalogSubscription, CatalogUpdate};
use crate::models::{Event, Viewer};

pub const ALERT_TITLE: &str = "Upcoming Event!";

/// Event ids already announced during one subscription lifetime.
#[derive(Debug, Default, Clone)]
pub struct NotificationRecord {
    alerted: HashSet<Uuid>,
}

impl NotificationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event_id: &Uuid) -> bool {
        self.alerted.contains(event_id)
    }

    /// Returns false when the id was already recorded.
    pub fn insert(&mut self, event_id: Uuid) -> bool {
        self.alerted.insert(event_id)
    }

    pub fn len(&self) -> usize {
        self.alerted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub event_id: Uuid,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn for_event(event: &Event) -> Self {
        Self {
            event_id: event.id,
            title: ALERT_TITLE.to_string(),
            description: format!("{} is happening soon. Don't miss it!", event.name),
        }
    }
}

/// Picks the soonest upcoming events not hosted by `viewer_id` and returns an
/// alert for each one missing from `record`, adding it there.
///
/// Events sharing the earliest start time are all selected in the same pass.
/// Dedup keys on the id only, so an event whose start time moves after it
/// was announced is not announced again.
pub fn select_upcoming(
    snapshot: &[Event],
    now: DateTime<Utc>,
    viewer_id: Uuid,
    record: &mut NotificationRecord,
) -> Vec<Notification> {
    let candidates: Vec<&Event> = snapshot
        .iter()
        .filter(|event| event.start_time > now && event.owner_id != viewer_id)
        .collect();

    let Some(min_start) = candidates.iter().map(|event| event.start_time).min() else {
        return Vec::new();
    };

    candidates
        .into_iter()
        .filter(|event| event.start_time == min_start)
        .filter(|event| record.insert(event.id))
        .map(Notification::for_event)
        .collect()
}

/// Receives alerts produced by a watcher.
pub trait Notifier: Send + 'static {
    fn notify(&self, notification: Notification);
}

/// Forwards alerts into a channel, e.g. towards a server-sent event stream.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self { sender }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::debug!("Alert receiver dropped");
        }
    }
}

/// Runs the alert selection against every snapshot for one viewer session.
pub struct UpcomingEventWatcher {
    subscription: Option<CatalogSubscription>,
}

impl UpcomingEventWatcher {
    /// Starts watching when the viewer is signed in with alerts enabled.
    /// Otherwise returns an idle watcher that never notifies.
    pub fn start<S, N>(source: Arc<S>, viewer: &Viewer, notifier: N) -> Self
    where
        S: CatalogSource + ?Sized,
        N: Notifier,
    {
        let viewer_id = match viewer.id() {
            Some(id) if viewer.wants_alerts() => id,
            Some(_) => {
                tracing::debug!("Alerts disabled for viewer, not watching");
                return Self::idle();
            }
            None => return Self::idle(),
        };

        // Owned by this subscription only; dropped with it.
        let mut record = NotificationRecord::new();
        let subscription = CatalogSubscription::subscribe(source, move |update| match update {
            CatalogUpdate::Snapshot(events) => {
                for notification in select_upcoming(&events, Utc::now(), viewer_id, &mut record) {
                    tracing::info!(
                        viewer_id = %viewer_id,
                        event_id = %notification.event_id,
                        "Upcoming event alert"
                    );
                    notifier.notify(notification);
                }
            }
            CatalogUpdate::Failed(e) => {
                tracing::warn!(viewer_id = %viewer_id, error = %e, "Alert watcher lost the catalog");
            }
        });

        Self {
            subscription: Some(subscription),
        }
    }

    fn idle() -> Self {
        Self { subscription: None }
    }

    pub fn is_running(&self) -> bool {
        self.subscription
            .as_ref()
            .map(CatalogSubscription::is_active)
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use crate::store::memory::fixtures::{at, event};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn ids(notifications: &[Notification]) -> HashSet<Uuid> {
        notifications.iter().map(|n| n.event_id).collect()
    }

    #[test]
    fn test_ties_are_batched() {
        let host = Uuid::new_v4();
        let a = event("A", host, 1_000);
        let b = event("B", host, 1_000);
        let c = event("C", host, 2_000);
        let snapshot = vec![c.clone(), a.clone(), b.clone()];

        let mut record = NotificationRecord::new();
        let sent = select_upcoming(&snapshot, at(500), Uuid::new_v4(), &mut record);

        assert_eq!(ids(&sent), [a.id, b.id].into_iter().collect());
        assert!(!record.contains(&c.id));
    }

    #[test]
    fn test_second_pass_is_silent() {
        let snapshot = vec![event("A", Uuid::new_v4(), 1_000)];
        let viewer = Uuid::new_v4();
        let mut record = NotificationRecord::new();

        assert_eq!(select_upcoming(&snapshot, at(0), viewer, &mut record).len(), 1);
        assert!(select_upcoming(&snapshot, at(0), viewer, &mut record).is_empty());
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_own_and_past_events_are_ignored() {
        let viewer = Uuid::new_v4();
        let own = event("Mine", viewer, 1_000);
        let past = event("Past", Uuid::new_v4(), 100);
        let exactly_now = event("Now", Uuid::new_v4(), 500);
        let later = event("Later", Uuid::new_v4(), 3_000);
        let snapshot = vec![own, past, exactly_now, later.clone()];

        let mut record = NotificationRecord::new();
        let sent = select_upcoming(&snapshot, at(500), viewer, &mut record);
        assert_eq!(ids(&sent), [later.id].into_iter().collect());
    }

    #[test]
    fn test_empty_candidates_have_no_side_effect() {
        let viewer = Uuid::new_v4();
        let snapshot = vec![event("Mine", viewer, 1_000), event("Old", Uuid::new_v4(), 10)];
        let mut record = NotificationRecord::new();

        assert!(select_upcoming(&snapshot, at(500), viewer, &mut record).is_empty());
        assert!(select_upcoming(&[], at(500), viewer, &mut record).is_empty());
        assert!(record.is_empty());
    }

    #[test]
    fn test_rescheduled_event_is_not_announced_again() {
        let mut soon = event("Soon", Uuid::new_v4(), 1_000);
        let viewer = Uuid::new_v4();
        let mut record = NotificationRecord::new();
        assert_eq!(
            select_upcoming(&[soon.clone()], at(0), viewer, &mut record).len(),
            1
        );

        soon.start_time = at(5_000);
        assert!(select_upcoming(&[soon], at(0), viewer, &mut record).is_empty());
    }

    #[test]
    fn test_already_alerted_minimum_blocks_later_events() {
        let host = Uuid::new_v4();
        let a = event("A", host, 1_000);
        let b = event("B", host, 2_000);
        let viewer = Uuid::new_v4();
        let mut record = NotificationRecord::new();
        record.insert(a.id);

        // Only the earliest start is ever eligible, even when already alerted
        let sent = select_upcoming(&[a, b], at(0), viewer, &mut record);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_selection_matches_definition() {
        let viewer = Uuid::new_v4();
        let host = Uuid::new_v4();
        let snapshot = vec![
            event("e1", host, 700),
            event("e2", viewer, 600),
            event("e3", host, 700),
            event("e4", host, 400),
            event("e5", host, 900),
        ];
        let now = at(500);
        let mut record = NotificationRecord::new();
        record.insert(snapshot[0].id);

        let eligible: Vec<&Event> = snapshot
            .iter()
            .filter(|e| e.start_time > now && e.owner_id != viewer)
            .collect();
        let min_start = eligible.iter().map(|e| e.start_time).min().unwrap();
        let expected: HashSet<Uuid> = eligible
            .iter()
            .filter(|e| e.start_time == min_start && !record.contains(&e.id))
            .map(|e| e.id)
            .collect();

        let sent = select_upcoming(&snapshot, now, viewer, &mut record);
        assert_eq!(ids(&sent), expected);
        assert_eq!(ids(&sent), [snapshot[2].id].into_iter().collect());
    }

    #[test]
    fn test_notification_copy() {
        let n = Notification::for_event(&event("Free Pizza", Uuid::new_v4(), 1));
        assert_eq!(n.title, "Upcoming Event!");
        assert_eq!(n.description, "Free Pizza is happening soon. Don't miss it!");
    }

    fn identity() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "viewer@bu.edu".to_string(),
        }
    }

    #[tokio::test]
    async fn test_watcher_stays_idle_without_opt_in() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = mpsc::unbounded_channel();

        let signed_out = UpcomingEventWatcher::start(
            store.clone(),
            &Viewer::signed_out().with_notifications(true),
            ChannelNotifier::new(tx.clone()),
        );
        assert!(!signed_out.is_running());

        let opted_out = UpcomingEventWatcher::start(
            store,
            &Viewer::signed_in(identity()),
            ChannelNotifier::new(tx),
        );
        assert!(!opted_out.is_running());
    }

    #[tokio::test]
    async fn test_watcher_alerts_once_per_session() {
        let store = Arc::new(MemoryStore::new());
        let mut upcoming = event("Dumplings", Uuid::new_v4(), 0);
        upcoming.start_time = Utc::now() + Duration::hours(2);
        store.seed(upcoming.clone());

        let viewer = Viewer::signed_in(identity()).with_notifications(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher =
            UpcomingEventWatcher::start(store.clone(), &viewer, ChannelNotifier::new(tx));
        assert!(watcher.is_running());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_id, upcoming.id);

        // A no-op rewrite produces a fresh snapshot but no new alert
        store.seed(upcoming.clone());
        let mut later = event("Later", Uuid::new_v4(), 0);
        later.start_time = Utc::now() + Duration::hours(5);
        store.seed(later);
        let silent =
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(silent.is_err());

        watcher.stop();
        assert!(!watcher.is_running());

        // A new session starts from an empty record
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _again = UpcomingEventWatcher::start(store, &viewer, ChannelNotifier::new(tx));
        assert_eq!(rx.recv().await.unwrap().event_id, upcoming.id);
    }
}
