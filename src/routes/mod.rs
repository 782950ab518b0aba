use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::events::{
    create_event, decrement_inventory, get_event, increment_inventory, list_events, list_reviews,
    proximity, submit_review, toggle_rsvp, update_event,
};
use crate::handlers::health_check;
use crate::handlers::profile::{get_profile, put_profile};
use crate::handlers::stream::{alerts_stream, catalog_stream};
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", get(list_events).post(create_event))
        .route("/events/stream", get(catalog_stream))
        .route("/events/:id", get(get_event).put(update_event))
        .route("/events/:id/inventory/increment", post(increment_inventory))
        .route("/events/:id/inventory/decrement", post(decrement_inventory))
        .route("/events/:id/rsvp", post(toggle_rsvp))
        .route("/events/:id/reviews", get(list_reviews).post(submit_review))
        .route("/events/:id/proximity", get(proximity))
        .route("/alerts/stream", get(alerts_stream))
        .route("/profile", get(get_profile).put(put_profile))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config))
        .layer(create_cors_layer(config))
}
