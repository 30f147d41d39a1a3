//! Taints nodes which joined the cluster before the controller was running.
//!
//! A node qualifies when it has no startup taint, has never completed startup, and runs nothing but
//! system pods. Tainting a node which already hosts workloads would evict nothing, but it would stop new
//! pods from landing there until a startup agent finishes, so those nodes are left alone.
use super::{
    error::{self, Result},
    index::NodeIndex,
    readiness::ReadinessEvaluator,
};
use models::node::{StartupClusterClient, StartupNodeExt};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use snafu::ResultExt;
use std::collections::BTreeMap;
use tokio::time::{sleep, Duration};
use tracing::{event, instrument, Level};

/// What the sweep decided for a single node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackfillDecision {
    AlreadyTainted,
    /// The node has a startup completion record and must not be tainted again.
    AlreadyCompleted,
    /// The node runs pods outside the system namespaces, or its pods could not be listed.
    HostsWorkloads,
    Tainted,
    /// Writing the taint failed. The node is left as it was.
    Failed,
}

/// The decisions made during one sweep, keyed by node name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackfillReport {
    pub decisions: BTreeMap<String, BackfillDecision>,
}

impl BackfillReport {
    pub fn count(&self, decision: BackfillDecision) -> usize {
        self.decisions
            .values()
            .filter(|candidate| **candidate == decision)
            .count()
    }
}

#[derive(Clone)]
pub struct BackfillSweep<T: StartupClusterClient> {
    client: T,
    readiness: ReadinessEvaluator<T>,
}

impl<T: StartupClusterClient> BackfillSweep<T> {
    pub fn new(client: T, index: NodeIndex) -> Self {
        BackfillSweep {
            readiness: ReadinessEvaluator::new(client.clone(), index),
            client,
        }
    }

    /// Lists every node and taints the ones which qualify.
    ///
    /// Only a failure to list nodes fails the sweep. Failures for individual nodes are logged and
    /// recorded in the report.
    #[instrument(skip(self), err)]
    pub async fn run(&self) -> Result<BackfillReport> {
        let nodes = self
            .client
            .list_nodes()
            .await
            .context(error::BackfillListNodesSnafu)?;

        let mut report = BackfillReport::default();
        for node in nodes {
            let node_name = node.name_any();
            let decision = self.backfill_node(node).await;
            event!(Level::DEBUG, node_name, ?decision, "Backfill decision.");
            report.decisions.insert(node_name, decision);
        }

        event!(
            Level::INFO,
            nodes = report.decisions.len(),
            tainted = report.count(BackfillDecision::Tainted),
            failed = report.count(BackfillDecision::Failed),
            "Backfill sweep finished."
        );
        Ok(report)
    }

    /// Runs a sweep, then another after every `interval`, forever.
    pub async fn run_every(&self, interval: Duration) {
        loop {
            // Errors are logged by instrumentation in `run()`.
            #[allow(unused_must_use)]
            {
                self.run().await;
            }
            sleep(interval).await;
        }
    }

    async fn backfill_node(&self, mut node: Node) -> BackfillDecision {
        if node.has_startup_taint() {
            return BackfillDecision::AlreadyTainted;
        }
        if node.startup_completed_at().is_some() {
            return BackfillDecision::AlreadyCompleted;
        }

        let node_name = node.name_any();
        match self.readiness.hosts_workload_pods(&node_name).await {
            Ok(false) => {}
            Ok(true) => return BackfillDecision::HostsWorkloads,
            Err(err) => {
                event!(
                    Level::WARN,
                    node_name,
                    error = %err,
                    "Could not determine which pods run on node, leaving it untainted."
                );
                return BackfillDecision::HostsWorkloads;
            }
        }

        node.add_startup_taint();
        match self
            .client
            .replace_node(&node)
            .await
            .context(error::AddStartupTaintSnafu {
                node_name: node_name.as_str(),
            }) {
            Ok(_) => {
                event!(Level::INFO, node_name, "Added startup taint to node.");
                BackfillDecision::Tainted
            }
            Err(err) => {
                event!(Level::WARN, node_name, error = %err, "Backfill failed for node.");
                BackfillDecision::Failed
            }
        }
    }
}
