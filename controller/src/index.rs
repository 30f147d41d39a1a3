//! A secondary index over the watched Pods, keyed by the Node each Pod is bound to.
//!
//! kube's `reflector::Store` only supports lookups by object reference. Readiness checks and the
//! backfill sweep need "all pods on node X", so the pod watch stream feeds this index instead.
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use models::pod::bound_node;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Bound pods are ordered by (namespace, name).
type PodKey = (String, String);

fn pod_key(pod_ref: &ObjectRef<Pod>) -> PodKey {
    (
        pod_ref.namespace.clone().unwrap_or_default(),
        pod_ref.name.clone(),
    )
}

#[derive(Debug, Default)]
struct IndexState {
    by_node: HashMap<String, BTreeMap<PodKey, Arc<Pod>>>,
    pods: HashMap<ObjectRef<Pod>, (Option<String>, Arc<Pod>)>,
    synced: bool,
}

impl IndexState {
    fn unlink(&mut self, pod_ref: &ObjectRef<Pod>) -> Option<Arc<Pod>> {
        let (node_name, previous) = self.pods.remove(pod_ref)?;
        if let Some(node_name) = node_name {
            if let Some(bound) = self.by_node.get_mut(&node_name) {
                bound.remove(&pod_key(pod_ref));
                if bound.is_empty() {
                    self.by_node.remove(&node_name);
                }
            }
        }
        Some(previous)
    }

    fn link(&mut self, pod_ref: ObjectRef<Pod>, pod: Arc<Pod>) {
        let node_name = bound_node(&pod).map(str::to_string);
        if let Some(node_name) = node_name.as_ref() {
            self.by_node
                .entry(node_name.clone())
                .or_default()
                .insert(pod_key(&pod_ref), pod.clone());
        }
        self.pods.insert(pod_ref, (node_name, pod));
    }
}

/// Node name to bound Pods, rebuilt incrementally from watch events.
///
/// Cloning yields another handle to the same index.
#[derive(Clone, Debug, Default)]
pub struct NodeIndex {
    state: Arc<RwLock<IndexState>>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // Mutations never leave the maps inconsistent, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or updates a pod, returning the version previously stored.
    ///
    /// If the pod's node binding changed, it is removed from the old node's entry.
    pub fn apply(&self, pod: &Pod) -> Option<Arc<Pod>> {
        let pod_ref = ObjectRef::from_obj(pod);
        let mut state = self.write();
        let previous = state.unlink(&pod_ref);
        state.link(pod_ref, Arc::new(pod.clone()));
        previous
    }

    /// Removes a pod, returning the version previously stored.
    pub fn delete(&self, pod: &Pod) -> Option<Arc<Pod>> {
        self.write().unlink(&ObjectRef::from_obj(pod))
    }

    /// Replaces the whole index with a fresh listing and marks it synced.
    pub fn replace(&self, pods: &[Pod]) {
        let mut state = self.write();
        state.by_node.clear();
        state.pods.clear();
        for pod in pods {
            state.link(ObjectRef::from_obj(pod), Arc::new(pod.clone()));
        }
        state.synced = true;
    }

    /// Whether the index has received a full listing of pods.
    pub fn is_synced(&self) -> bool {
        self.read().synced
    }

    /// Pods currently bound to the node, or `None` if the index hasn't synced yet.
    pub fn pods_on(&self, node_name: &str) -> Option<Vec<Arc<Pod>>> {
        let state = self.read();
        if !state.synced {
            return None;
        }
        Some(
            state
                .by_node
                .get(node_name)
                .map(|bound| bound.values().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Number of pods tracked, bound or not.
    pub fn len(&self) -> usize {
        self.read().pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
