mod client;
mod error;

pub use self::client::*;
pub use self::error::Error as StartupClientError;

use crate::constants::{
    NODE_STARTUP_COMPLETED_ANNOTATION, STARTUP_TAINT_EFFECT, STARTUP_TAINT_KEY,
    STARTUP_TAINT_VALUE,
};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Taint};
use kube::ResourceExt;

#[cfg(feature = "mockall")]
pub use self::client::MockStartupClusterClient;

/// Returns the taint which gates scheduling on a node until its startup agent has finished.
pub fn startup_taint() -> Taint {
    Taint {
        key: STARTUP_TAINT_KEY.to_string(),
        value: Some(STARTUP_TAINT_VALUE.to_string()),
        effect: STARTUP_TAINT_EFFECT.to_string(),
        time_added: None,
    }
}

/// Whether the given taint is the startup taint. Key, value and effect must all match exactly.
pub fn is_startup_taint(taint: &Taint) -> bool {
    taint.key == STARTUP_TAINT_KEY
        && taint.value.as_deref() == Some(STARTUP_TAINT_VALUE)
        && taint.effect == STARTUP_TAINT_EFFECT
}

pub fn has_startup_taint(taints: &[Taint]) -> bool {
    taints.iter().any(is_startup_taint)
}

/// Startup taint bookkeeping on a k8s `Node`.
///
/// The mutating methods only modify the local object. Persisting the change is left to the caller
/// so that it can be done under optimistic concurrency.
pub trait StartupNodeExt {
    /// Whether the node currently carries the startup taint.
    fn has_startup_taint(&self) -> bool;

    /// The completion record, if the startup taint has been removed from this node before.
    /// Empty values are treated as absent.
    fn startup_completed_at(&self) -> Option<&str>;

    /// Appends the startup taint. Returns `false` without modifying the node if it was already present.
    fn add_startup_taint(&mut self) -> bool;

    /// Removes every copy of the startup taint, keeping other taints in their original order.
    /// Returns whether the node was modified.
    fn remove_startup_taint(&mut self) -> bool;

    /// Writes the completion record as a decimal Unix timestamp.
    fn mark_startup_complete(&mut self, at: DateTime<Utc>);
}

impl StartupNodeExt for Node {
    fn has_startup_taint(&self) -> bool {
        self.spec
            .as_ref()
            .and_then(|spec| spec.taints.as_deref())
            .map_or(false, has_startup_taint)
    }

    fn startup_completed_at(&self) -> Option<&str> {
        self.annotations()
            .get(NODE_STARTUP_COMPLETED_ANNOTATION)
            .map(String::as_str)
            .filter(|completed_at| !completed_at.is_empty())
    }

    fn add_startup_taint(&mut self) -> bool {
        if self.has_startup_taint() {
            return false;
        }
        self.spec
            .get_or_insert_with(Default::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(startup_taint());
        true
    }

    fn remove_startup_taint(&mut self) -> bool {
        let taints = match self.spec.as_mut().and_then(|spec| spec.taints.as_mut()) {
            Some(taints) => taints,
            None => return false,
        };
        let before = taints.len();
        taints.retain(|taint| !is_startup_taint(taint));
        taints.len() != before
    }

    fn mark_startup_complete(&mut self, at: DateTime<Utc>) {
        self.annotations_mut().insert(
            NODE_STARTUP_COMPLETED_ANNOTATION.to_string(),
            at.timestamp().to_string(),
        );
    }
}
