//! Turns k8s watch streams into add/update notifications for a `ResourceEventHandler`.
//!
//! Each stream first updates a cache of the objects it has seen, which is how an update is told apart
//! from an add. Handlers for different notifications run concurrently and are not deduplicated.
use super::index::NodeIndex;

use async_trait::async_trait;
use futures::{future, stream, Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::watcher;
use kube::Resource;
use std::hash::Hash;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{event, Level};

// Maximum number of notifications handled at once for a single watch stream.
const CONCURRENT_HANDLERS: usize = 16;

/// Receives notifications about objects observed on a watch stream.
///
/// Deletions are intentionally not part of this interface.
#[async_trait]
pub trait ResourceEventHandler<K: Send + Sync + 'static>: Send + Sync {
    /// An object was observed for the first time, including during the initial listing.
    async fn on_add(&self, obj: K);
    /// An object changed. `old` is the last version observed before this one.
    async fn on_update(&self, old: Arc<K>, new: K);
}

/// A notification derived from a watch event.
#[derive(Debug, PartialEq)]
pub enum Notification<K> {
    Added(K),
    Updated { old: Arc<K>, new: K },
}

/// A cache of watched objects, updated before handlers are notified.
pub trait ObjectTracker<K> {
    /// Stores the object, returning the version it replaced.
    fn apply(&mut self, obj: &K) -> Option<Arc<K>>;
    fn delete(&mut self, obj: &K);
    /// Replaces the whole cache after a watch (re)start.
    fn replace(&mut self, objs: &[K]);
}

impl ObjectTracker<Pod> for NodeIndex {
    fn apply(&mut self, pod: &Pod) -> Option<Arc<Pod>> {
        NodeIndex::apply(self, pod)
    }

    fn delete(&mut self, pod: &Pod) {
        NodeIndex::delete(self, pod);
    }

    fn replace(&mut self, pods: &[Pod]) {
        NodeIndex::replace(self, pods)
    }
}

impl<K> ObjectTracker<K> for Writer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn apply(&mut self, obj: &K) -> Option<Arc<K>> {
        let previous = self.as_reader().get(&ObjectRef::from_obj(obj));
        self.apply_watcher_event(&watcher::Event::Applied(obj.clone()));
        previous
    }

    fn delete(&mut self, obj: &K) {
        self.apply_watcher_event(&watcher::Event::Deleted(obj.clone()));
    }

    fn replace(&mut self, objs: &[K]) {
        self.apply_watcher_event(&watcher::Event::Restarted(objs.to_vec()));
    }
}

/// Updates the tracker with a watch event and returns the notifications it produces.
///
/// Deletions only update the tracker.
pub fn notifications<K, T>(tracker: &mut T, event: watcher::Event<K>) -> Vec<Notification<K>>
where
    T: ObjectTracker<K>,
{
    match event {
        watcher::Event::Applied(obj) => {
            let notification = match tracker.apply(&obj) {
                Some(old) => Notification::Updated { old, new: obj },
                None => Notification::Added(obj),
            };
            vec![notification]
        }
        watcher::Event::Deleted(obj) => {
            tracker.delete(&obj);
            Vec::new()
        }
        watcher::Event::Restarted(objs) => {
            tracker.replace(&objs);
            objs.into_iter().map(Notification::Added).collect()
        }
    }
}

/// Drives a watch stream to completion, notifying `handler` of every add and update.
///
/// Watch errors are logged and skipped; the watcher itself is responsible for backing off and
/// restarting.
pub async fn dispatch_events<K, S, T, H>(events: S, mut tracker: T, handler: &H)
where
    K: Resource + Send + Sync + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    T: ObjectTracker<K>,
    H: ResourceEventHandler<K>,
{
    events
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) => Some(event),
                Err(err) => {
                    event!(Level::WARN, error = %err, "Watch stream error.");
                    None
                }
            })
        })
        .flat_map(move |event| stream::iter(notifications(&mut tracker, event)))
        .for_each_concurrent(CONCURRENT_HANDLERS, |notification| async move {
            match notification {
                Notification::Added(obj) => handler.on_add(obj).await,
                Notification::Updated { old, new } => handler.on_update(old, new).await,
            }
        })
        .await;
}

/// Re-delivers every cached object to `handler` as an update whose old and new versions are equal.
///
/// Handlers that failed earlier get another chance without waiting for the object to change.
pub async fn redeliver<K, H>(store: &Store<K>, handler: &H)
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone,
    H: ResourceEventHandler<K>,
{
    let objs = store.state();
    event!(Level::DEBUG, objects = objs.len(), "Resyncing cached objects.");
    stream::iter(objs)
        .for_each_concurrent(CONCURRENT_HANDLERS, |obj| async move {
            handler.on_update(obj.clone(), (*obj).clone()).await
        })
        .await;
}

/// Calls `redeliver` every `period`, forever.
pub async fn resync_every<K, H>(store: Store<K>, period: Duration, handler: &H)
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone,
    H: ResourceEventHandler<K>,
{
    loop {
        sleep(period).await;
        redeliver(&store, handler).await;
    }
}
