//! Fixtures and an in-memory cluster for exercising the controller without a k8s API server.
use models::constants::{
    POD_READY_CONDITION, STARTUP_POD_LABEL_KEY, STARTUP_POD_LABEL_VALUE,
    STARTUP_POD_READY_ANNOTATION,
};
use models::node::{startup_taint, StartupClientError, StartupClusterClient};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ContainerStatus, Node, NodeSpec, Pod, PodCondition, PodSpec, PodStatus, Taint,
};
use kube::api::ObjectMeta;
use kube::error::ErrorResponse;
use kube::ResourceExt;
use maplit::btreemap;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

type Result<T> = std::result::Result<T, StartupClientError>;

pub(crate) fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("scripted failure {}", code),
        reason: "Scripted".to_string(),
        code,
    })
}

pub(crate) fn node(name: &str, taints: Vec<Taint>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            taints: Some(taints),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn marked_node(name: &str) -> Node {
    node(name, vec![startup_taint()])
}

pub(crate) fn workload_pod(name: &str, namespace: &str, node_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus::default()),
    }
}

/// A startup agent pod with no ready annotation and no conditions.
pub(crate) fn agent_pod(name: &str, node_name: &str) -> Pod {
    let mut pod = workload_pod(name, "startup", node_name);
    pod.metadata.labels = Some(btreemap! {
        STARTUP_POD_LABEL_KEY.to_string() => STARTUP_POD_LABEL_VALUE.to_string(),
    });
    pod
}

/// A startup agent pod which has set the ready annotation.
pub(crate) fn annotated_agent_pod(name: &str, node_name: &str) -> Pod {
    let mut pod = agent_pod(name, node_name);
    pod.annotations_mut().insert(
        STARTUP_POD_READY_ANNOTATION.to_string(),
        "true".to_string(),
    );
    pod
}

/// A startup agent pod whose containers and Ready condition all report ready.
pub(crate) fn ready_agent_pod(name: &str, node_name: &str) -> Pod {
    let mut pod = agent_pod(name, node_name);
    pod.status = Some(PodStatus {
        container_statuses: Some(vec![ContainerStatus {
            ready: true,
            ..Default::default()
        }]),
        conditions: Some(vec![PodCondition {
            type_: POD_READY_CONDITION.to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

#[derive(Debug, Default)]
struct FakeClusterState {
    nodes: BTreeMap<String, Node>,
    pods: Vec<Pod>,
    resource_version: u64,
    scripted_update_failures: VecDeque<u16>,
    fail_pod_lists: bool,
    fail_node_lists: bool,
    update_attempts: usize,
    writes: usize,
}

/// An in-memory stand-in for the k8s API.
///
/// Node writes are guarded by `resourceVersion` like the real API server, and failures can be scripted
/// for upcoming `replace_node` calls.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<FakeClusterState>>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeClusterState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_node(self, mut node: Node) -> Self {
        {
            let mut state = self.lock();
            state.resource_version += 1;
            node.metadata.resource_version = Some(state.resource_version.to_string());
            state.nodes.insert(node.name_any(), node);
        }
        self
    }

    pub(crate) fn with_pod(self, pod: Pod) -> Self {
        self.upsert_pod(pod);
        self
    }

    pub(crate) fn upsert_pod(&self, pod: Pod) {
        let mut state = self.lock();
        state.pods.retain(|existing| {
            existing.name_any() != pod.name_any() || existing.namespace() != pod.namespace()
        });
        state.pods.push(pod);
    }

    pub(crate) fn pods(&self) -> Vec<Pod> {
        self.lock().pods.clone()
    }

    pub(crate) fn stored_node(&self, name: &str) -> Node {
        self.lock().nodes[name].clone()
    }

    /// Fails the next `replace_node` calls with the given API status codes, in order.
    pub(crate) fn script_update_failures(&self, codes: &[u16]) {
        self.lock().scripted_update_failures.extend(codes);
    }

    pub(crate) fn fail_pod_lists(&self) {
        self.lock().fail_pod_lists = true;
    }

    pub(crate) fn restore_pod_lists(&self) {
        self.lock().fail_pod_lists = false;
    }

    pub(crate) fn fail_node_lists(&self) {
        self.lock().fail_node_lists = true;
    }

    /// Number of `replace_node` calls, successful or not.
    pub(crate) fn update_attempts(&self) -> usize {
        self.lock().update_attempts
    }

    /// Number of `replace_node` calls which changed the stored node.
    pub(crate) fn writes(&self) -> usize {
        self.lock().writes
    }
}

#[async_trait]
impl StartupClusterClient for FakeCluster {
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        self.lock()
            .nodes
            .get(node_name)
            .cloned()
            .ok_or_else(|| StartupClientError::GetNode {
                node_name: node_name.to_string(),
                source: api_error(404),
            })
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let state = self.lock();
        if state.fail_node_lists {
            return Err(StartupClientError::ListNodes {
                source: api_error(503),
            });
        }
        Ok(state.nodes.values().cloned().collect())
    }

    async fn replace_node(&self, node: &Node) -> Result<Node> {
        let node_name = node.name_any();
        let mut state = self.lock();
        state.update_attempts += 1;

        let failure = state.scripted_update_failures.pop_front().or_else(|| {
            match state.nodes.get(&node_name) {
                None => Some(404),
                Some(stored) if stored.metadata.resource_version == node.metadata.resource_version => {
                    None
                }
                Some(_) => Some(409),
            }
        });
        if let Some(code) = failure {
            return Err(StartupClientError::UpdateNode {
                node_name,
                source: api_error(code),
            });
        }

        state.resource_version += 1;
        let mut stored = node.clone();
        stored.metadata.resource_version = Some(state.resource_version.to_string());
        state.nodes.insert(node_name, stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn list_pods(
        &self,
        node_name: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<Pod>> {
        let state = self.lock();
        if state.fail_pod_lists {
            return Err(StartupClientError::ListPods {
                node_name: node_name.to_string(),
                source: api_error(503),
            });
        }

        let label = label_selector.as_deref().and_then(|selector| selector.split_once('='));
        Ok(state
            .pods
            .iter()
            .filter(|pod| {
                pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) == Some(node_name)
            })
            .filter(|pod| {
                label.map_or(true, |(key, value)| {
                    pod.labels().get(key).map(String::as_str) == Some(value)
                })
            })
            .cloned()
            .collect())
    }
}
