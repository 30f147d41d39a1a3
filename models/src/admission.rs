//! The mutation an admission webhook applies to newly created Nodes.
//!
//! Serving the webhook is out of scope for this workspace, but the patch it must produce is defined
//! here so that it agrees with the taint the controller later looks for and removes.
use crate::constants::{NODE_POOL_MODE_LABEL, NODE_POOL_MODE_SYSTEM};
use crate::node::{startup_taint, StartupNodeExt};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single RFC 6902 JSON patch operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonPatchOp {
    pub op: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Whether the node belongs to a pool which never receives the startup taint.
pub fn is_excluded_pool(node: &Node) -> bool {
    node.labels().get(NODE_POOL_MODE_LABEL).map(String::as_str) == Some(NODE_POOL_MODE_SYSTEM)
}

/// Computes the JSON patch which adds the startup taint to a Node being created.
///
/// Returns `None` if the node already carries the taint or belongs to an excluded pool.
pub fn startup_taint_patch(node: &Node) -> serde_json::Result<Option<Vec<JsonPatchOp>>> {
    if node.has_startup_taint() || is_excluded_pool(node) {
        return Ok(None);
    }

    let has_taints = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map_or(false, |taints| !taints.is_empty());

    let op = if has_taints {
        JsonPatchOp {
            op: "add".to_string(),
            path: "/spec/taints/-".to_string(),
            value: Some(serde_json::to_value(startup_taint())?),
        }
    } else {
        JsonPatchOp {
            op: "add".to_string(),
            path: "/spec/taints".to_string(),
            value: Some(serde_json::to_value(vec![startup_taint()])?),
        }
    };
    Ok(Some(vec![op]))
}
