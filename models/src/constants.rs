/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
#[macro_export]
macro_rules! startup_domain {
    () => {
        "startup.k8s.io"
    };
    ($s:literal) => {
        concat!(startup_domain!(), "/", $s)
    };
}

pub const STARTUP_DOMAIN_LIKE_NAME: &str = startup_domain!();

// Startup taint
pub const STARTUP_TAINT_KEY: &str = startup_domain!("initializing");
pub const STARTUP_TAINT_VALUE: &str = "wait";
pub const STARTUP_TAINT_EFFECT: &str = "NoSchedule";

// Startup agent pods
pub const STARTUP_POD_LABEL_KEY: &str = startup_domain!("component");
pub const STARTUP_POD_LABEL_VALUE: &str = "init";
/// Annotation a startup agent pod can set once its work is done, bypassing readiness checks.
pub const STARTUP_POD_READY_ANNOTATION: &str = startup_domain!("ready");
pub const STARTUP_POD_READY_ANNOTATION_VALUE: &str = "true";

/// Annotation the controller stamps onto a Node when the startup taint is removed.
pub const NODE_STARTUP_COMPLETED_ANNOTATION: &str = startup_domain!("completedAt");

/// Pods in these namespaces don't count as workloads when deciding whether to backfill a node.
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public"];

// Node pools which never receive the startup taint at admission.
pub const NODE_POOL_MODE_LABEL: &str = "kubernetes.azure.com/mode";
pub const NODE_POOL_MODE_SYSTEM: &str = "system";

// Kubernetes object kinds and fields
pub const POD_READY_CONDITION: &str = "Ready";
pub const CONDITION_TRUE: &str = "True";
pub const POD_NODE_NAME_FIELD: &str = "spec.nodeName";

pub const CONTROLLER: &str = "startup-taint-controller";
