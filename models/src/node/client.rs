use super::error::{self, Result};
use crate::constants::POD_NODE_NAME_FIELD;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, PostParams};
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use tracing::instrument;

#[cfg(feature = "mockall")]
use mockall::mock;

#[async_trait]
/// A trait providing an interface to the parts of the k8s API the startup controller needs. This is
/// provided as a trait in order to allow mocks and in-memory fakes to be used for testing purposes.
pub trait StartupClusterClient: Clone + Sized + Send + Sync {
    /// Fetch the current version of a Node.
    async fn get_node(&self, node_name: &str) -> Result<Node>;
    /// List every Node in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    /// Overwrite a Node. The write is rejected with a conflict if the Node's `resourceVersion` is stale.
    async fn replace_node(&self, node: &Node) -> Result<Node>;
    /// List Pods scheduled onto the given Node, optionally narrowed by a label selector.
    async fn list_pods(
        &self,
        node_name: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<Pod>>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock StartupClusterClient for use in tests.
    pub StartupClusterClient {}
    #[async_trait]
    impl StartupClusterClient for StartupClusterClient {
        async fn get_node(&self, node_name: &str) -> Result<Node>;
        async fn list_nodes(&self) -> Result<Vec<Node>>;
        async fn replace_node(&self, node: &Node) -> Result<Node>;
        async fn list_pods(&self, node_name: &str, label_selector: Option<String>) -> Result<Vec<Pod>>;
    }

    impl Clone for StartupClusterClient {
        fn clone(&self) -> Self;
    }
}

#[async_trait]
impl<T> StartupClusterClient for Arc<T>
where
    T: StartupClusterClient,
{
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        (**self).get_node(node_name).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        (**self).list_nodes().await
    }

    async fn replace_node(&self, node: &Node) -> Result<Node> {
        (**self).replace_node(node).await
    }

    async fn list_pods(
        &self,
        node_name: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<Pod>> {
        (**self).list_pods(node_name, label_selector).await
    }
}

#[derive(Clone)]
/// Concrete implementation of the `StartupClusterClient` trait. This implementation will almost
/// certainly be used in any case that isn't a unit test.
pub struct K8SStartupClusterClient {
    k8s_client: kube::client::Client,
}

impl K8SStartupClusterClient {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SStartupClusterClient { k8s_client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.k8s_client.clone())
    }

    fn pods(&self) -> Api<Pod> {
        Api::all(self.k8s_client.clone())
    }
}

#[async_trait]
impl StartupClusterClient for K8SStartupClusterClient {
    #[instrument(skip(self), err)]
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        self.nodes()
            .get(node_name)
            .await
            .context(error::GetNodeSnafu { node_name })
    }

    #[instrument(skip(self), err)]
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self
            .nodes()
            .list(&ListParams::default())
            .await
            .context(error::ListNodesSnafu)?
            .items)
    }

    #[instrument(skip(self, node), fields(node_name = ?node.metadata.name), err)]
    async fn replace_node(&self, node: &Node) -> Result<Node> {
        let node_name = node.metadata.name.as_deref().context(error::MissingNodeNameSnafu)?;
        self.nodes()
            .replace(node_name, &PostParams::default(), node)
            .await
            .context(error::UpdateNodeSnafu { node_name })
    }

    #[instrument(skip(self), err)]
    async fn list_pods(
        &self,
        node_name: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<Pod>> {
        let mut list_params =
            ListParams::default().fields(&format!("{}={}", POD_NODE_NAME_FIELD, node_name));
        if let Some(label_selector) = label_selector {
            list_params = list_params.labels(&label_selector);
        }

        let pods = self
            .pods()
            .list(&list_params)
            .await
            .context(error::ListPodsSnafu { node_name })?;

        // The field selector is authoritative, but guard against servers that ignore it.
        Ok(pods
            .items
            .into_iter()
            .filter(|pod| {
                pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) == Some(node_name)
            })
            .collect())
    }
}
