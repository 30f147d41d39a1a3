use super::{
    error::{self, Result},
    index::NodeIndex,
};
use models::node::StartupClusterClient;
use models::pod::{any_startup_pod_complete, hosts_workload_pods, startup_pod_label_selector};

use snafu::ResultExt;
use tracing::{event, instrument, Level};

/// Answers questions about the pods bound to a node.
///
/// The `NodeIndex` is preferred once it has synced. Until then, each question is answered with a list
/// request against the k8s API.
#[derive(Clone)]
pub struct ReadinessEvaluator<T: StartupClusterClient> {
    client: T,
    index: NodeIndex,
}

impl<T: StartupClusterClient> ReadinessEvaluator<T> {
    pub fn new(client: T, index: NodeIndex) -> Self {
        ReadinessEvaluator { client, index }
    }

    /// Whether any startup agent pod on the node has finished.
    ///
    /// A failure to list pods is returned as an error, never as "ready".
    #[instrument(skip(self), err)]
    pub async fn startup_pod_ready(&self, node_name: &str) -> Result<bool> {
        if let Some(pods) = self.index.pods_on(node_name) {
            return Ok(any_startup_pod_complete(
                pods.iter().map(|pod| &**pod),
                node_name,
            ));
        }

        event!(
            Level::DEBUG,
            node_name,
            "Pod index has not synced, listing startup pods from the API."
        );
        let pods = self
            .client
            .list_pods(node_name, Some(startup_pod_label_selector()))
            .await
            .context(error::ListNodePodsSnafu { node_name })?;
        Ok(any_startup_pod_complete(&pods, node_name))
    }

    /// Whether the node runs any pod outside of the trusted system namespaces.
    #[instrument(skip(self), err)]
    pub async fn hosts_workload_pods(&self, node_name: &str) -> Result<bool> {
        if let Some(pods) = self.index.pods_on(node_name) {
            return Ok(hosts_workload_pods(pods.iter().map(|pod| &**pod)));
        }

        let pods = self
            .client
            .list_pods(node_name, None)
            .await
            .context(error::ListNodePodsSnafu { node_name })?;
        Ok(hosts_workload_pods(&pods))
    }
}
