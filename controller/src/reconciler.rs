use super::{
    dispatcher::ResourceEventHandler,
    error::{self, Result},
    index::NodeIndex,
    readiness::ReadinessEvaluator,
    remover::{remove_startup_taint, TaintRemoval},
};
use models::node::{StartupClusterClient, StartupNodeExt};
use models::pod::{bound_node, is_startup_pod};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// What reconciling a node (or a startup agent pod's node) amounted to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeOutcome {
    /// Nothing to do: the node doesn't carry the startup taint, or the pod isn't a bound startup agent.
    Skipped,
    /// The node carries the startup taint, but no startup agent pod on it has finished.
    AwaitingStartupPod,
    /// The startup taint was removed and the completion record written.
    TaintRemoved,
    /// The startup pod finished, but the taint had already been removed by the time it was re-read.
    AlreadyRemoved,
}

/// Removes the startup taint from nodes once their startup agent pods are done.
///
/// A node is either tainted or untainted. The only transition this reconciler makes is from tainted
/// to untainted; untainted nodes are never re-tainted here.
///
/// Events for the same node may be reconciled concurrently. This is safe because taint removal is an
/// optimistic-concurrency read-modify-write that becomes a no-op once the taint is gone.
#[derive(Clone)]
pub struct StartupReconciler<T: StartupClusterClient> {
    client: T,
    readiness: ReadinessEvaluator<T>,
}

impl<T: StartupClusterClient> StartupReconciler<T> {
    pub fn new(client: T, index: NodeIndex) -> Self {
        StartupReconciler {
            readiness: ReadinessEvaluator::new(client.clone(), index),
            client,
        }
    }

    /// Removes the startup taint from `node` if it is tainted and a startup agent pod on it has finished.
    #[instrument(skip(self, node), fields(node_name = %node.name_any()))]
    pub async fn reconcile_node(&self, node: &Node) -> Result<NodeOutcome> {
        if !node.has_startup_taint() {
            return Ok(NodeOutcome::Skipped);
        }
        let node_name = node
            .metadata
            .name
            .as_deref()
            .context(error::NodeWithoutNameSnafu)?;

        if !self.readiness.startup_pod_ready(node_name).await? {
            event!(Level::DEBUG, "Startup pod has not finished.");
            return Ok(NodeOutcome::AwaitingStartupPod);
        }

        match remove_startup_taint(&self.client, node_name).await? {
            TaintRemoval::Removed => {
                event!(Level::INFO, "Removed startup taint from node.");
                Ok(NodeOutcome::TaintRemoved)
            }
            TaintRemoval::AlreadyAbsent => {
                event!(Level::DEBUG, "Startup taint was already removed.");
                Ok(NodeOutcome::AlreadyRemoved)
            }
        }
    }

    /// Re-checks the node a startup agent pod is bound to, if that node is still tainted.
    #[instrument(skip(self, pod), fields(pod_name = %pod.name_any()))]
    pub async fn reconcile_pod(&self, pod: &Pod) -> Result<NodeOutcome> {
        if !is_startup_pod(pod) {
            return Ok(NodeOutcome::Skipped);
        }
        let node_name = match bound_node(pod) {
            Some(node_name) => node_name,
            None => return Ok(NodeOutcome::Skipped),
        };

        let node = self
            .client
            .get_node(node_name)
            .await
            .context(error::FetchNodeSnafu { node_name })?;
        if !node.has_startup_taint() {
            return Ok(NodeOutcome::Skipped);
        }
        self.reconcile_node(&node).await
    }

    async fn handle_node(&self, node: Node) {
        if let Err(err) = self.reconcile_node(&node).await {
            event!(
                Level::WARN,
                node_name = %node.name_any(),
                error = %err,
                "Failed to reconcile node; it will be retried on its next event."
            );
        }
    }

    async fn handle_pod(&self, pod: Pod) {
        if let Err(err) = self.reconcile_pod(&pod).await {
            event!(
                Level::WARN,
                pod_name = %pod.name_any(),
                error = %err,
                "Failed to reconcile node for startup pod."
            );
        }
    }
}

#[async_trait]
impl<T: StartupClusterClient + 'static> ResourceEventHandler<Node> for StartupReconciler<T> {
    async fn on_add(&self, node: Node) {
        self.handle_node(node).await
    }

    async fn on_update(&self, _old: Arc<Node>, node: Node) {
        self.handle_node(node).await
    }
}

#[async_trait]
impl<T: StartupClusterClient + 'static> ResourceEventHandler<Pod> for StartupReconciler<T> {
    async fn on_add(&self, pod: Pod) {
        self.handle_pod(pod).await
    }

    // Only the latest version of the pod matters.
    async fn on_update(&self, _old: Arc<Pod>, pod: Pod) {
        self.handle_pod(pod).await
    }
}
