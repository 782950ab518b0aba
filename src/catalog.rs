//! Live mirror of the shared event catalog.
//!
//! Every delivery carries the full current set of events, never a delta, and
//! in no particular order. Consumers must tolerate repeated or unchanged
//! snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::JoinHandle;

use crate::models::Event;
use crate::store::{EventStore, SnapshotStream, StoreError};

pub type Snapshot = Arc<[Event]>;

#[derive(Debug)]
pub enum CatalogUpdate {
    Snapshot(Snapshot),
    /// The underlying transport failed. No further updates follow; retrying
    /// is up to whoever owns the transport.
    Failed(StoreError),
}

/// Anything that can open a stream of full catalog snapshots.
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    async fn open_snapshots(&self) -> Result<SnapshotStream, StoreError>;
}

#[async_trait]
impl<T> CatalogSource for T
where
    T: EventStore + ?Sized,
{
    async fn open_snapshots(&self) -> Result<SnapshotStream, StoreError> {
        self.watch().await
    }
}

/// Handle to a running catalog subscription. Dropping it unsubscribes.
pub struct CatalogSubscription {
    active: Arc<AtomicBool>,
    // Held while a callback runs so unsubscribe() waits out an in-flight
    // delivery. Reentrant so a callback may unsubscribe itself.
    gate: Arc<ReentrantMutex<()>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CatalogSubscription {
    pub fn subscribe<S, F>(source: Arc<S>, mut on_update: F) -> Self
    where
        S: CatalogSource + ?Sized,
        F: FnMut(CatalogUpdate) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let gate = Arc::new(ReentrantMutex::new(()));

        let task_active = active.clone();
        let task_gate = gate.clone();
        let task = tokio::spawn(async move {
            let mut deliver = move |update: CatalogUpdate| -> bool {
                let _guard = task_gate.lock();
                if !task_active.load(Ordering::Acquire) {
                    return false;
                }
                on_update(update);
                true
            };

            let mut snapshots = match source.open_snapshots().await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    tracing::warn!(error = %e, "Catalog subscription failed to start");
                    deliver(CatalogUpdate::Failed(e));
                    return;
                }
            };

            while let Some(item) = snapshots.next().await {
                match item {
                    Ok(events) => {
                        tracing::trace!(events = events.len(), "Catalog snapshot received");
                        if !deliver(CatalogUpdate::Snapshot(events.into())) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Catalog subscription transport failed");
                        deliver(CatalogUpdate::Failed(e));
                        break;
                    }
                }
            }

            tracing::debug!("Catalog subscription ended");
        });

        Self {
            active,
            gate,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops delivery. Once this returns no callback is running and none
    /// will run again. Calling it more than once is harmless.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        drop(self.gate.lock());

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        tracing::debug!("Catalog subscription cancelled");
    }
}

impl Drop for CatalogSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures::event;
    use crate::store::MemoryStore;
    use futures::stream;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct ScriptedSource {
        items: Mutex<Option<Vec<Result<Vec<Event>, StoreError>>>>,
    }

    #[async_trait]
    impl CatalogSource for ScriptedSource {
        async fn open_snapshots(&self) -> Result<SnapshotStream, StoreError> {
            let items = self.items.lock().take().unwrap_or_default();
            Ok(stream::iter(items).chain(stream::pending()).boxed())
        }
    }

    fn channel_subscription<S: CatalogSource + ?Sized>(
        source: Arc<S>,
    ) -> (CatalogSubscription, mpsc::UnboundedReceiver<CatalogUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = CatalogSubscription::subscribe(source, move |update| {
            let _ = tx.send(update);
        });
        (subscription, rx)
    }

    #[tokio::test]
    async fn test_delivers_full_snapshots() {
        let store = Arc::new(MemoryStore::new());
        store.seed(event("Bagels", Uuid::new_v4(), 1_000));

        let (_subscription, mut rx) = channel_subscription(store.clone());

        match rx.recv().await.unwrap() {
            CatalogUpdate::Snapshot(events) => assert_eq!(events.len(), 1),
            other => panic!("unexpected update: {:?}", other),
        }

        store.seed(event("Pizza", Uuid::new_v4(), 2_000));
        match rx.recv().await.unwrap() {
            CatalogUpdate::Snapshot(events) => assert_eq!(events.len(), 2),
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_once() {
        let source = Arc::new(ScriptedSource {
            items: Mutex::new(Some(vec![
                Ok(vec![]),
                Err(StoreError::Transport("connection reset".to_string())),
                Ok(vec![]),
            ])),
        });

        let (_subscription, mut rx) = channel_subscription(source);

        assert!(matches!(
            rx.recv().await.unwrap(),
            CatalogUpdate::Snapshot(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CatalogUpdate::Failed(StoreError::Transport(_))
        ));
        // The task ends and drops the callback after the failure
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_stops_delivery() {
        let store = Arc::new(MemoryStore::new());
        let (subscription, mut rx) = channel_subscription(store.clone());

        assert!(matches!(
            rx.recv().await.unwrap(),
            CatalogUpdate::Snapshot(_)
        ));

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());

        store.seed(event("Late", Uuid::new_v4(), 1_000));
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_callback_may_unsubscribe_itself() {
        let store = Arc::new(MemoryStore::new());
        let holder: Arc<Mutex<Option<Arc<CatalogSubscription>>>> = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let inner = holder.clone();
        let subscription = Arc::new(CatalogSubscription::subscribe(store.clone(), move |_| {
            if let Some(subscription) = inner.lock().as_ref() {
                subscription.unsubscribe();
            }
            let _ = tx.send(());
        }));
        *holder.lock() = Some(subscription.clone());

        store.seed(event("Soup", Uuid::new_v4(), 1_000));
        rx.recv().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(1), async {
            while subscription.is_active() {
                store.seed(event("More", Uuid::new_v4(), 1_000));
                tokio::task::yield_now().await;
            }
        })
        .await
        .is_ok());
    }
}
