use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use super::{EventStore, InventoryChange, SnapshotStream, StoreError};
use crate::models::{Comment, Event, EventDraft, EventLocation, FoodType, NewComment, Profile};

const EVENTS_CHANNEL: &str = "events_changed";

const EVENT_COLUMNS: &str = "id, owner_id, hoster, contact_email, name, details, \
     street, unit, city, state, postal_code, country, start_time, end_time, \
     food_types, food_counter, rsvps, created_at, updated_at";

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    owner_id: Uuid,
    hoster: String,
    contact_email: String,
    name: String,
    details: String,
    street: String,
    unit: Option<String>,
    city: String,
    state: String,
    postal_code: String,
    country: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    food_types: Vec<String>,
    food_counter: i32,
    rsvps: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let food_types = row
            .food_types
            .iter()
            .map(|tag| tag.parse::<FoodType>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| StoreError::Corrupt(format!("event {}: {}", row.id, e)))?;

        let food_counter = u32::try_from(row.food_counter).map_err(|_| {
            StoreError::Corrupt(format!(
                "event {}: negative food counter {}",
                row.id, row.food_counter
            ))
        })?;

        Ok(Event {
            id: row.id,
            owner_id: row.owner_id,
            hoster: row.hoster,
            contact_email: row.contact_email,
            name: row.name,
            details: row.details,
            location: EventLocation {
                street: row.street,
                unit: row.unit,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
                country: row.country,
            },
            start_time: row.start_time,
            end_time: row.end_time,
            food_types,
            food_counter,
            rsvps: row.rsvps.into_iter().collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    display_name: Option<String>,
    account_type: String,
    notifications: bool,
    dietary_restrictions: Vec<String>,
    food_preferences: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let account_type = row
            .account_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("profile {}: {}", row.user_id, e)))?;

        Ok(Profile {
            user_id: row.user_id,
            display_name: row.display_name,
            account_type,
            notifications: row.notifications,
            dietary_restrictions: row.dietary_restrictions,
            food_preferences: row.food_preferences,
            updated_at: row.updated_at,
        })
    }
}

fn food_tags(food_types: &BTreeSet<FoodType>) -> Vec<String> {
    food_types.iter().map(|tag| tag.as_str().to_string()).collect()
}

enum WatchState {
    Initial(PgListener),
    Listening(PgListener),
    Done,
}

/// Postgres-backed store. Catalog changes are pushed to watchers through
/// LISTEN/NOTIFY on the `events_changed` channel.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("Successfully connected to database");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        tracing::info!("Migrations run successfully");
        Ok(())
    }

    async fn fetch_all(pool: &PgPool) -> Result<Vec<Event>, StoreError> {
        let sql = format!("SELECT {} FROM events", EVENT_COLUMNS);
        sqlx::query_as::<_, EventRow>(&sql)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    /// Distinguishes a missing event from a foreign one after a guarded
    /// update touched no row.
    async fn explain_miss(&self, id: Uuid, caller: Uuid) -> StoreError {
        let owner: Result<Option<Uuid>, sqlx::Error> =
            sqlx::query_scalar("SELECT owner_id FROM events WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match owner {
            Ok(Some(_)) => StoreError::NotOwner {
                event: id,
                user: caller,
            },
            Ok(None) => StoreError::EventNotFound(id),
            Err(e) => StoreError::Database(e),
        }
    }

    async fn update_rsvps(
        &self,
        id: Uuid,
        contact: &str,
        expression: &str,
    ) -> Result<BTreeSet<String>, StoreError> {
        let sql = format!(
            "UPDATE events SET rsvps = {}, updated_at = NOW() WHERE id = $1 RETURNING rsvps",
            expression
        );
        let rsvps: Option<Vec<String>> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(contact)
            .fetch_optional(&self.pool)
            .await?;

        rsvps
            .map(|set| set.into_iter().collect())
            .ok_or(StoreError::EventNotFound(id))
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        Self::fetch_all(&self.pool).await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let sql = format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS);
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Event::try_from)
            .transpose()
    }

    async fn create_event(&self, owner: Uuid, draft: EventDraft) -> Result<Event, StoreError> {
        let sql = format!(
            "INSERT INTO events (id, owner_id, hoster, contact_email, name, details, \
             street, unit, city, state, postal_code, country, start_time, end_time, food_types) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {}",
            EVENT_COLUMNS
        );

        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(owner)
            .bind(&draft.hoster)
            .bind(&draft.contact_email)
            .bind(&draft.name)
            .bind(&draft.details)
            .bind(&draft.location.street)
            .bind(&draft.location.unit)
            .bind(&draft.location.city)
            .bind(&draft.location.state)
            .bind(&draft.location.postal_code)
            .bind(&draft.location.country)
            .bind(draft.start_time)
            .bind(draft.end_time)
            .bind(food_tags(&draft.food_types))
            .fetch_one(&self.pool)
            .await?;

        Event::try_from(row)
    }

    async fn replace_event(
        &self,
        id: Uuid,
        caller: Uuid,
        draft: EventDraft,
    ) -> Result<Event, StoreError> {
        let sql = format!(
            "UPDATE events SET hoster = $3, contact_email = $4, name = $5, details = $6, \
             street = $7, unit = $8, city = $9, state = $10, postal_code = $11, country = $12, \
             start_time = $13, end_time = $14, food_types = $15, updated_at = NOW() \
             WHERE id = $1 AND owner_id = $2 RETURNING {}",
            EVENT_COLUMNS
        );

        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .bind(caller)
            .bind(&draft.hoster)
            .bind(&draft.contact_email)
            .bind(&draft.name)
            .bind(&draft.details)
            .bind(&draft.location.street)
            .bind(&draft.location.unit)
            .bind(&draft.location.city)
            .bind(&draft.location.state)
            .bind(&draft.location.postal_code)
            .bind(&draft.location.country)
            .bind(draft.start_time)
            .bind(draft.end_time)
            .bind(food_tags(&draft.food_types))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Event::try_from(row),
            None => Err(self.explain_miss(id, caller).await),
        }
    }

    async fn adjust_food_counter(
        &self,
        id: Uuid,
        caller: Uuid,
        change: InventoryChange,
    ) -> Result<u32, StoreError> {
        let expression = match change {
            InventoryChange::Increment => "food_counter + 1",
            InventoryChange::Decrement => "GREATEST(food_counter - 1, 0)",
        };
        let sql = format!(
            "UPDATE events SET food_counter = {}, updated_at = NOW() \
             WHERE id = $1 AND owner_id = $2 RETURNING food_counter",
            expression
        );

        let count: Option<i32> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(caller)
            .fetch_optional(&self.pool)
            .await?;

        match count {
            Some(count) => u32::try_from(count).map_err(|_| {
                StoreError::Corrupt(format!("event {}: negative food counter {}", id, count))
            }),
            None => Err(self.explain_miss(id, caller).await),
        }
    }

    async fn add_rsvp(&self, id: Uuid, contact: &str) -> Result<BTreeSet<String>, StoreError> {
        self.update_rsvps(
            id,
            contact,
            "CASE WHEN $2 = ANY(rsvps) THEN rsvps ELSE array_append(rsvps, $2) END",
        )
        .await
    }

    async fn remove_rsvp(&self, id: Uuid, contact: &str) -> Result<BTreeSet<String>, StoreError> {
        self.update_rsvps(id, contact, "array_remove(rsvps, $2)")
            .await
    }

    async fn watch(&self) -> Result<SnapshotStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(EVENTS_CHANNEL).await?;

        let pool = self.pool.clone();
        let snapshots = stream::unfold(WatchState::Initial(listener), move |state| {
            let pool = pool.clone();
            async move {
                let listener = match state {
                    WatchState::Initial(listener) => listener,
                    WatchState::Listening(mut listener) => match listener.try_recv().await {
                        Ok(Some(notification)) => {
                            tracing::debug!(
                                event_id = notification.payload(),
                                "Catalog change notification"
                            );
                            listener
                        }
                        // The listener reconnects on its own only through recv(); a dropped
                        // connection ends this stream and is reported to the subscriber.
                        Ok(None) => {
                            return Some((
                                Err(StoreError::Transport(
                                    "listener connection lost".to_string(),
                                )),
                                WatchState::Done,
                            ))
                        }
                        Err(e) => return Some((Err(StoreError::Database(e)), WatchState::Done)),
                    },
                    WatchState::Done => return None,
                };

                match Self::fetch_all(&pool).await {
                    Ok(events) => Some((Ok(events), WatchState::Listening(listener))),
                    Err(e) => Some((Err(e), WatchState::Done)),
                }
            }
        });

        Ok(snapshots.boxed())
    }

    async fn add_comment(
        &self,
        event_id: Uuid,
        comment: NewComment,
    ) -> Result<Comment, StoreError> {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::EventNotFound(event_id));
        }

        let stored = sqlx::query_as::<_, Comment>(
            "INSERT INTO event_comments (id, event_id, user_id, username, body, rating) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, event_id, user_id, username, body, rating, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(comment.user_id)
        .bind(&comment.username)
        .bind(&comment.body)
        .bind(comment.rating)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn list_comments(&self, event_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        if self.get_event(event_id).await?.is_none() {
            return Err(StoreError::EventNotFound(event_id));
        }

        let comments = sqlx::query_as::<_, Comment>(
            "SELECT id, event_id, user_id, username, body, rating, created_at \
             FROM event_comments WHERE event_id = $1 ORDER BY created_at DESC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, display_name, account_type, notifications, \
             dietary_restrictions, food_preferences, updated_at \
             FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Profile::try_from)
        .transpose()
    }

    async fn put_profile(&self, profile: Profile) -> Result<Profile, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "INSERT INTO profiles (user_id, display_name, account_type, notifications, \
             dietary_restrictions, food_preferences, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET display_name = EXCLUDED.display_name, \
             account_type = EXCLUDED.account_type, notifications = EXCLUDED.notifications, \
             dietary_restrictions = EXCLUDED.dietary_restrictions, \
             food_preferences = EXCLUDED.food_preferences, updated_at = NOW() \
             RETURNING user_id, display_name, account_type, notifications, \
             dietary_restrictions, food_preferences, updated_at",
        )
        .bind(profile.user_id)
        .bind(&profile.display_name)
        .bind(profile.account_type.to_string())
        .bind(profile.notifications)
        .bind(&profile.dietary_restrictions)
        .bind(&profile.food_preferences)
        .fetch_one(&self.pool)
        .await?;

        Profile::try_from(row)
    }
}
