//! Distance and travel time from the viewer to an event.
//!
//! One geocoding call turns the event address into coordinates (first
//! candidate wins), one driving-route call turns the coordinate pair into
//! distance and duration (first route wins). Results are cached against the
//! `(address, position)` pair and only recomputed when that pair changes.
//! Each lookup runs on its own task, so a caller that goes away mid-lookup
//! does not leave the key unresolved. Lookups cannot be cancelled, so each
//! carries a generation token and results arriving for a superseded key are
//! dropped.

pub mod mapbox;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Coordinates, EventLocation};

pub use mapbox::MapboxClient;

pub const METERS_PER_MILE: f64 = 1609.34;

const UNAVAILABLE: &str = "Unavailable";
const ERROR: &str = "Error";

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geo service is not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid service url: {0}")]
    Url(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteSummary {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

#[async_trait]
pub trait GeoService: Send + Sync + 'static {
    /// Candidate coordinates for a free-text address, best match first.
    async fn geocode(&self, address: &str) -> Result<Vec<Coordinates>, GeoError>;

    /// Driving routes between two points, preferred route first.
    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<Vec<RouteSummary>, GeoError>;
}

/// Stand-in used when no geo credentials are configured. Every lookup fails,
/// which surfaces as an unavailable estimate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGeo;

#[async_trait]
impl GeoService for DisabledGeo {
    async fn geocode(&self, _address: &str) -> Result<Vec<Coordinates>, GeoError> {
        Err(GeoError::NotConfigured)
    }

    async fn route(
        &self,
        _origin: Coordinates,
        _destination: Coordinates,
    ) -> Result<Vec<RouteSummary>, GeoError> {
        Err(GeoError::NotConfigured)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityStatus {
    /// Address or viewer position unknown; nothing to show.
    Idle,
    Loading,
    Ready,
    /// Geocoding found nothing or failed, or no route exists.
    Unavailable,
    /// The routing call itself failed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityResult {
    pub distance: String,
    pub duration: String,
    pub loading: bool,
    pub status: ProximityStatus,
}

impl ProximityResult {
    pub fn idle() -> Self {
        Self::placeholder("", ProximityStatus::Idle)
    }

    pub fn loading() -> Self {
        Self {
            loading: true,
            ..Self::placeholder("", ProximityStatus::Loading)
        }
    }

    pub fn unavailable() -> Self {
        Self::placeholder(UNAVAILABLE, ProximityStatus::Unavailable)
    }

    pub fn error() -> Self {
        Self::placeholder(ERROR, ProximityStatus::Error)
    }

    pub fn ready(route: RouteSummary) -> Self {
        Self {
            distance: format_distance(route.distance_meters),
            duration: format_duration(route.duration_seconds),
            loading: false,
            status: ProximityStatus::Ready,
        }
    }

    fn placeholder(text: &str, status: ProximityStatus) -> Self {
        Self {
            distance: text.to_string(),
            duration: text.to_string(),
            loading: false,
            status,
        }
    }
}

/// Meters to statute miles, one decimal place.
pub fn format_distance(meters: f64) -> String {
    format!("{:.1} miles", meters / METERS_PER_MILE)
}

/// Seconds to whole minutes, rounded. Negative or non-finite input reads as
/// zero; routes with such durations never reach here.
pub fn format_duration(seconds: f64) -> String {
    let minutes = if seconds.is_finite() {
        (seconds.max(0.0) / 60.0).round() as i64
    } else {
        0
    };
    format!("{} minutes", minutes)
}

impl RouteSummary {
    fn is_plausible(&self) -> bool {
        self.distance_meters.is_finite()
            && self.duration_seconds.is_finite()
            && self.distance_meters >= 0.0
            && self.duration_seconds >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProximityKey {
    address: String,
    position: Coordinates,
}

type PendingLookup = Shared<BoxFuture<'static, ProximityResult>>;

struct EstimatorState {
    key: Option<ProximityKey>,
    generation: u64,
    result: ProximityResult,
    // Set while the lookup for `key` is still running.
    pending: Option<PendingLookup>,
}

/// Proximity for one event as seen by one viewer.
pub struct ProximityEstimator<G: ?Sized = dyn GeoService> {
    geo: Arc<G>,
    state: Arc<Mutex<EstimatorState>>,
}

impl<G> ProximityEstimator<G>
where
    G: GeoService + ?Sized,
{
    pub fn new(geo: Arc<G>) -> Self {
        Self {
            geo,
            state: Arc::new(Mutex::new(EstimatorState {
                key: None,
                generation: 0,
                result: ProximityResult::idle(),
                pending: None,
            })),
        }
    }

    pub fn current(&self) -> ProximityResult {
        self.state.lock().result.clone()
    }

    /// Forgets the active key. Lookups still in flight are discarded when
    /// they land.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.key = None;
        state.generation += 1;
        state.result = ProximityResult::idle();
        state.pending = None;
    }

    /// Returns the estimate for `location` as seen from `position`, calling
    /// out only when the pair differs from the one last asked about. Asking
    /// again while that lookup runs waits on the same lookup.
    pub async fn estimate(
        &self,
        location: &EventLocation,
        position: Option<Coordinates>,
    ) -> ProximityResult {
        let (Some(address), Some(position)) = (location.geocoding_query(), position) else {
            return ProximityResult::idle();
        };
        let key = ProximityKey { address, position };

        let (generation, pending) = {
            let mut state = self.state.lock();
            if state.key.as_ref() == Some(&key) {
                match &state.pending {
                    Some(pending) => (state.generation, pending.clone()),
                    None => return state.result.clone(),
                }
            } else {
                state.key = Some(key.clone());
                state.generation += 1;
                state.result = ProximityResult::loading();
                let pending = self.spawn_lookup(key, state.generation);
                state.pending = Some(pending.clone());
                (state.generation, pending)
            }
        };

        let result = pending.await;

        let state = self.state.lock();
        if state.generation != generation {
            return state.result.clone();
        }
        result
    }

    fn spawn_lookup(&self, key: ProximityKey, generation: u64) -> PendingLookup {
        let geo = self.geo.clone();
        let shared = self.state.clone();

        let task = tokio::spawn(async move {
            let result = lookup(&*geo, &key).await;

            let mut state = shared.lock();
            if state.generation == generation {
                state.result = result.clone();
                state.pending = None;
            } else {
                tracing::debug!(
                    generation,
                    active = state.generation,
                    "Discarding stale proximity result"
                );
            }
            result
        });

        task.map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Proximity lookup task failed");
                ProximityResult::error()
            })
        })
        .boxed()
        .shared()
    }
}

async fn lookup<G>(geo: &G, key: &ProximityKey) -> ProximityResult
where
    G: GeoService + ?Sized,
{
    let destination = match geo.geocode(&key.address).await {
        Ok(candidates) => match candidates.into_iter().next() {
            Some(destination) => destination,
            None => {
                tracing::warn!(address = %key.address, "No coordinates found for event location");
                return ProximityResult::unavailable();
            }
        },
        Err(e) => {
            tracing::warn!(address = %key.address, error = %e, "Geocoding failed");
            return ProximityResult::unavailable();
        }
    };

    match geo.route(key.position, destination).await {
        Ok(routes) => match routes.first() {
            Some(route) if route.is_plausible() => ProximityResult::ready(*route),
            Some(route) => {
                tracing::warn!(address = %key.address, ?route, "Route has no usable distance or duration");
                ProximityResult::unavailable()
            }
            None => {
                tracing::warn!(address = %key.address, "No routes found");
                ProximityResult::unavailable()
            }
        },
        Err(e) => {
            tracing::error!(address = %key.address, error = %e, "Routing failed");
            ProximityResult::error()
        }
    }
}
