use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::attendance::AttendanceRegistry;
use crate::catalog::{CatalogSubscription, CatalogUpdate};
use crate::config::Config;
use crate::proximity::{DisabledGeo, GeoError, GeoService, MapboxClient, ProximityEstimator};
use crate::reviews::ReviewBook;
use crate::store::EventStore;

type EstimatorKey = (Uuid, Uuid);

const ESTIMATOR_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const MAX_ESTIMATORS: usize = 10_000;

struct CachedEstimator {
    estimator: Arc<ProximityEstimator>,
    last_used: Instant,
}

/// One estimator per (event, viewer) so each viewer keeps their own cached
/// key. Entries idle past the timeout are swept on insert, and the least
/// recently used go first once the map is full.
struct EstimatorCache {
    entries: HashMap<EstimatorKey, CachedEstimator>,
    idle_timeout: Duration,
    capacity: usize,
}

impl EstimatorCache {
    fn new(idle_timeout: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            idle_timeout,
            capacity: capacity.max(1),
        }
    }

    fn get_or_insert_with<F>(
        &mut self,
        key: EstimatorKey,
        now: Instant,
        make: F,
    ) -> Arc<ProximityEstimator>
    where
        F: FnOnce() -> ProximityEstimator,
    {
        if let Some(cached) = self.entries.get_mut(&key) {
            cached.last_used = now;
            return cached.estimator.clone();
        }

        self.evict_idle(now);
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(key, _)| *key);
            match oldest {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        let estimator = Arc::new(make());
        self.entries.insert(
            key,
            CachedEstimator {
                estimator: estimator.clone(),
                last_used: now,
            },
        );
        estimator
    }

    fn evict_idle(&mut self, now: Instant) {
        let before = self.entries.len();
        let timeout = self.idle_timeout;
        self.entries
            .retain(|_, cached| now.saturating_duration_since(cached.last_used) <= timeout);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.entries.len(),
                "Evicted idle proximity estimators"
            );
        }
    }

    fn retain_events(&mut self, live: &HashSet<Uuid>) {
        self.entries.retain(|(event, _), _| live.contains(event));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub attendance: AttendanceRegistry,
    pub reviews: ReviewBook,
    geo: Arc<dyn GeoService>,
    estimators: Arc<Mutex<EstimatorCache>>,
}

impl AppState {
    pub fn new(store: Arc<dyn EventStore>, geo: Arc<dyn GeoService>) -> Self {
        Self {
            attendance: AttendanceRegistry::new(store.clone()),
            reviews: ReviewBook::new(store.clone()),
            store,
            geo,
            estimators: Arc::new(Mutex::new(EstimatorCache::new(
                ESTIMATOR_IDLE_TIMEOUT,
                MAX_ESTIMATORS,
            ))),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn EventStore>) -> Result<Self, GeoError> {
        let geo: Arc<dyn GeoService> = match &config.mapbox_token {
            Some(token) => Arc::new(MapboxClient::new(&config.mapbox_base_url, token.clone())?),
            None => Arc::new(DisabledGeo),
        };
        Ok(Self::new(store, geo))
    }

    pub fn estimator(&self, event_id: Uuid, viewer_id: Uuid) -> Arc<ProximityEstimator> {
        let geo = self.geo.clone();
        self.estimators
            .lock()
            .get_or_insert_with((event_id, viewer_id), Instant::now(), || {
                ProximityEstimator::new(geo)
            })
    }

    /// Drops estimators for events that leave the catalog. The map is only
    /// pruned while the returned handle is held.
    pub fn track_catalog(&self) -> CatalogSubscription {
        let estimators = self.estimators.clone();
        CatalogSubscription::subscribe(self.store.clone(), move |update| {
            if let CatalogUpdate::Snapshot(events) = update {
                let live: HashSet<Uuid> = events.iter().map(|event| event.id).collect();
                estimators.lock().retain_events(&live);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures::event;
    use crate::store::MemoryStore;

    #[test]
    fn test_estimators_are_per_event_and_viewer() {
        let state = AppState::new(Arc::new(MemoryStore::new()), Arc::new(DisabledGeo));
        let (event, viewer) = (Uuid::new_v4(), Uuid::new_v4());

        let a = state.estimator(event, viewer);
        let b = state.estimator(event, viewer);
        let c = state.estimator(event, Uuid::new_v4());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    fn estimator() -> ProximityEstimator {
        let geo: Arc<dyn GeoService> = Arc::new(DisabledGeo);
        ProximityEstimator::new(geo)
    }

    #[test]
    fn test_idle_estimators_are_evicted() {
        let mut cache = EstimatorCache::new(Duration::from_secs(60), 100);
        let start = Instant::now();
        let stale = (Uuid::new_v4(), Uuid::new_v4());
        let busy = (Uuid::new_v4(), Uuid::new_v4());

        let first = cache.get_or_insert_with(stale, start, estimator);
        cache.get_or_insert_with(busy, start, estimator);
        cache.get_or_insert_with(busy, start + Duration::from_secs(50), estimator);

        cache.get_or_insert_with(
            (Uuid::new_v4(), Uuid::new_v4()),
            start + Duration::from_secs(90),
            estimator,
        );
        assert_eq!(cache.len(), 2);

        let again = cache.get_or_insert_with(stale, start + Duration::from_secs(91), estimator);
        assert!(!Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_full_cache_drops_least_recently_used() {
        let mut cache = EstimatorCache::new(Duration::from_secs(3600), 2);
        let start = Instant::now();
        let (a, b, c) = (
            (Uuid::new_v4(), Uuid::new_v4()),
            (Uuid::new_v4(), Uuid::new_v4()),
            (Uuid::new_v4(), Uuid::new_v4()),
        );

        let kept = cache.get_or_insert_with(a, start, estimator);
        cache.get_or_insert_with(b, start + Duration::from_secs(1), estimator);
        cache.get_or_insert_with(a, start + Duration::from_secs(2), estimator);
        cache.get_or_insert_with(c, start + Duration::from_secs(3), estimator);

        assert_eq!(cache.len(), 2);
        let still = cache.get_or_insert_with(a, start + Duration::from_secs(4), estimator);
        assert!(Arc::ptr_eq(&kept, &still));
        assert!(!cache.entries.contains_key(&b));
    }

    #[tokio::test]
    async fn test_estimators_for_vanished_events_are_pruned() {
        let store = Arc::new(MemoryStore::new());
        let live = event("Tacos", Uuid::new_v4(), 1_000);
        let live_id = live.id;
        store.seed(live);
        let state = AppState::new(store, Arc::new(DisabledGeo));

        let kept = state.estimator(live_id, Uuid::new_v4());
        state.estimator(Uuid::new_v4(), Uuid::new_v4());
        state.estimator(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(state.estimators.lock().len(), 3);

        let _tracking = state.track_catalog();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while state.estimators.lock().len() != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let cache = state.estimators.lock();
        assert!(cache.entries.keys().all(|(event, _)| *event == live_id));
        assert!(cache
            .entries
            .values()
            .any(|cached| Arc::ptr_eq(&cached.estimator, &kept)));
    }

    #[test]
    fn test_from_config_without_token() {
        let state = AppState::from_config(&Config::local(), Arc::new(MemoryStore::new()));
        assert!(state.is_ok());
    }
}
