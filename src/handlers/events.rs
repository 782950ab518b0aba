use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::CurrentViewer;
use crate::attendance::{RsvpState, RsvpToggle};
use crate::inventory::InventorySynchronizer;
use crate::models::{Coordinates, Event, EventDraft};
use crate::proximity::ProximityResult;
use crate::reviews::ReviewDraft;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Serialize)]
struct InventoryPayload {
    event_id: Uuid,
    food_counter: u32,
}

/// An event plus the signed-in viewer's RSVP state, absent when signed out.
#[derive(Debug, Serialize)]
struct EventDetail {
    #[serde(flatten)]
    event: Event,
    rsvp: Option<RsvpState>,
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl PositionQuery {
    fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                Some(Coordinates::new(lat, lon))
            }
            _ => None,
        }
    }
}

async fn fetch_event(state: &AppState, id: Uuid) -> Result<Event, AppError> {
    state
        .store
        .get_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", id)))
}

pub async fn list_events(State(state): State<AppState>) -> Result<Response, AppError> {
    let mut events = state.store.list_events().await?;
    events.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    Ok(success(events, "Events fetched"))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    CurrentViewer(viewer): CurrentViewer,
) -> Result<Response, AppError> {
    let event = fetch_event(&state, id).await?;
    let rsvp = viewer.contact().map(|contact| RsvpState::of(&event, contact));
    Ok(success(EventDetail { event, rsvp }, "Event fetched"))
}

pub async fn create_event(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Json(draft): Json<EventDraft>,
) -> Result<Response, AppError> {
    draft.validate()?;
    let identity = viewer.require_identity("host an event")?;

    let event = state.store.create_event(identity.id, draft).await?;
    tracing::info!(event_id = %event.id, owner_id = %event.owner_id, "Event created");
    Ok(created(event, "Event created successfully!"))
}

pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    viewer: CurrentViewer,
    Json(draft): Json<EventDraft>,
) -> Result<Response, AppError> {
    draft.validate()?;
    let identity = viewer.require_identity("edit an event")?;

    let event = state.store.replace_event(id, identity.id, draft).await?;
    tracing::info!(event_id = %event.id, "Event updated");
    Ok(success(event, "Event updated successfully!"))
}

pub async fn increment_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    viewer: CurrentViewer,
) -> Result<Response, AppError> {
    let identity = viewer.require_identity("update food")?;
    let inventory = InventorySynchronizer::load(state.store.clone(), id).await?;
    let food_counter = inventory.increment(identity.id).await?;
    Ok(success(
        InventoryPayload {
            event_id: id,
            food_counter,
        },
        "Food added",
    ))
}

pub async fn decrement_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    viewer: CurrentViewer,
) -> Result<Response, AppError> {
    let identity = viewer.require_identity("update food")?;
    let inventory = InventorySynchronizer::load(state.store.clone(), id).await?;
    let food_counter = inventory.decrement(identity.id).await?;
    Ok(success(
        InventoryPayload {
            event_id: id,
            food_counter,
        },
        "Food removed",
    ))
}

pub async fn toggle_rsvp(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    viewer: CurrentViewer,
) -> Result<Response, AppError> {
    let identity = viewer.require_identity("RSVP")?;
    let toggle: RsvpToggle = state.attendance.toggle_rsvp(id, &identity.email).await?;
    let message = toggle.outcome.message();
    Ok(success(toggle, message))
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let reviews = state.reviews.list(id).await?;
    Ok(success(reviews, "Reviews fetched"))
}

pub async fn submit_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    CurrentViewer(viewer): CurrentViewer,
    Json(draft): Json<ReviewDraft>,
) -> Result<Response, AppError> {
    let review = state.reviews.submit(&viewer, id, draft).await?;
    Ok(created(review, "Review submitted successfully!"))
}

pub async fn proximity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    CurrentViewer(viewer): CurrentViewer,
    Query(query): Query<PositionQuery>,
) -> Result<Response, AppError> {
    let event = fetch_event(&state, id).await?;

    let viewer = match query.coordinates() {
        Some(position) => viewer.with_position(position),
        None => viewer,
    };

    let result = match (viewer.id(), viewer.effective_position()) {
        (Some(viewer_id), Some(position)) => {
            state
                .estimator(id, viewer_id)
                .estimate(&event.location, Some(position))
                .await
        }
        _ => ProximityResult::idle(),
    };

    Ok(success(result, "Proximity estimated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_query_needs_both_finite_coordinates() {
        let full = PositionQuery {
            lat: Some(42.35),
            lon: Some(-71.1),
        };
        assert_eq!(full.coordinates(), Some(Coordinates::new(42.35, -71.1)));

        let half = PositionQuery {
            lat: Some(42.35),
            lon: None,
        };
        assert!(half.coordinates().is_none());

        let nan = PositionQuery {
            lat: Some(f64::NAN),
            lon: Some(1.0),
        };
        assert!(nan.coordinates().is_none());
    }
}
