//! Server-sent event feeds. Each open connection owns one catalog
//! subscription; closing the connection tears it down.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::identity::CurrentViewer;
use crate::catalog::{CatalogSubscription, CatalogUpdate};
use crate::notify::{ChannelNotifier, UpcomingEventWatcher};
use crate::state::AppState;
use crate::utils::error::AppError;

type SseStream = BoxStream<'static, Result<SseEvent, Infallible>>;

const KEEP_ALIVE_SECS: u64 = 15;

/// Keeps `guard` alive for as long as the wrapped stream is.
#[pin_project::pin_project]
struct Guarded<S, G> {
    #[pin]
    inner: S,
    _guard: G,
}

impl<S, G> Stream for Guarded<S, G>
where
    S: Stream,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

fn json_event<T: Serialize + ?Sized>(name: &str, payload: &T) -> SseEvent {
    SseEvent::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode SSE payload");
            SseEvent::default().event("error").data("encoding failed")
        })
}

fn sse(stream: SseStream) -> Sse<SseStream> {
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS)))
}

/// GET /events/stream - full catalog snapshot on every change.
pub async fn catalog_stream(State(state): State<AppState>) -> Sse<SseStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = CatalogSubscription::subscribe(state.store.clone(), move |update| {
        if tx.send(update).is_err() {
            tracing::debug!("Catalog stream receiver dropped");
        }
    });
    tracing::info!("Catalog stream opened");

    let events = UnboundedReceiverStream::new(rx).map(|update| {
        Ok(match update {
            CatalogUpdate::Snapshot(events) => json_event("snapshot", &*events),
            CatalogUpdate::Failed(e) => {
                tracing::warn!(error = %e, "Catalog stream transport failed");
                SseEvent::default()
                    .event("error")
                    .data("The event catalog is temporarily unavailable")
            }
        })
    });

    sse(Guarded {
        inner: events,
        _guard: subscription,
    }
    .boxed())
}

/// GET /alerts/stream - "starting soon" alerts for the signed-in viewer.
/// The dedup record lives as long as this connection.
pub async fn alerts_stream(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
) -> Result<Sse<SseStream>, AppError> {
    let viewer_id = viewer
        .id()
        .ok_or_else(|| AppError::AuthError("You must sign in to receive alerts.".to_string()))?;

    let notifications = state
        .store
        .get_profile(viewer_id)
        .await?
        .map(|profile| profile.notifications)
        .unwrap_or(false);
    let viewer = viewer.with_notifications(notifications);

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = UpcomingEventWatcher::start(state.store.clone(), &viewer, ChannelNotifier::new(tx));

    if !watcher.is_running() {
        tracing::debug!(viewer_id = %viewer_id, "Alerts are off, closing stream");
        let idle = stream::once(async {
            Ok(SseEvent::default()
                .event("idle")
                .data("Notifications are turned off"))
        });
        return Ok(sse(idle.boxed()));
    }
    tracing::info!(viewer_id = %viewer_id, "Alert stream opened");

    let alerts = UnboundedReceiverStream::new(rx)
        .map(|notification| Ok(json_event("alert", &notification)));

    Ok(sse(Guarded {
        inner: alerts,
        _guard: watcher,
    }
    .boxed()))
}
