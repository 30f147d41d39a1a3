//! Rules for interpreting the startup agent pods that run on each node.
//!
//! A startup agent pod signals that its node has finished initializing either explicitly, by setting
//! the ready annotation to `"true"`, or implicitly, by having every container ready along with a true
//! `Ready` pod condition.
use crate::constants::{
    CONDITION_TRUE, POD_READY_CONDITION, STARTUP_POD_LABEL_KEY, STARTUP_POD_LABEL_VALUE,
    STARTUP_POD_READY_ANNOTATION, STARTUP_POD_READY_ANNOTATION_VALUE, SYSTEM_NAMESPACES,
};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// The label selector matching startup agent pods, for use in list requests.
pub fn startup_pod_label_selector() -> String {
    format!("{}={}", STARTUP_POD_LABEL_KEY, STARTUP_POD_LABEL_VALUE)
}

/// Whether the pod is labelled as a startup agent.
pub fn is_startup_pod(pod: &Pod) -> bool {
    pod.labels().get(STARTUP_POD_LABEL_KEY).map(String::as_str) == Some(STARTUP_POD_LABEL_VALUE)
}

/// The node the pod is scheduled onto, if any.
pub fn bound_node(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .filter(|node_name| !node_name.is_empty())
}

/// Whether the pod has explicitly declared its startup work complete.
fn has_ready_annotation(pod: &Pod) -> bool {
    pod.annotations()
        .get(STARTUP_POD_READY_ANNOTATION)
        .map(String::as_str)
        == Some(STARTUP_POD_READY_ANNOTATION_VALUE)
}

fn all_containers_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map_or(true, |statuses| statuses.iter().all(|status| status.ready))
}

fn has_ready_condition(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map_or(false, |conditions| {
            conditions.iter().any(|condition| {
                condition.type_ == POD_READY_CONDITION && condition.status == CONDITION_TRUE
            })
        })
}

/// Whether a startup agent pod has finished its work.
///
/// The ready annotation overrides all container and condition state. Otherwise every container must
/// report ready and the pod's `Ready` condition must be true; a missing condition is never treated as
/// ready.
pub fn startup_pod_complete(pod: &Pod) -> bool {
    has_ready_annotation(pod) || (all_containers_ready(pod) && has_ready_condition(pod))
}

/// Whether any startup agent pod bound to `node_name` has finished. Pods that aren't startup agents,
/// or which are bound elsewhere, are ignored.
pub fn any_startup_pod_complete<'a, I>(pods: I, node_name: &str) -> bool
where
    I: IntoIterator<Item = &'a Pod>,
{
    pods.into_iter()
        .filter(|pod| is_startup_pod(pod))
        .filter(|pod| bound_node(pod) == Some(node_name))
        .any(startup_pod_complete)
}

pub fn is_system_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&namespace)
}

/// Whether any of the given pods is a workload, i.e. lives outside the trusted system namespaces.
pub fn hosts_workload_pods<'a, I>(pods: I) -> bool
where
    I: IntoIterator<Item = &'a Pod>,
{
    pods.into_iter().any(|pod| {
        pod.namespace()
            .map_or(true, |namespace| !is_system_namespace(&namespace))
    })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodCondition, PodSpec, PodStatus};
    use kube::api::ObjectMeta;
    use maplit::btreemap;
    use std::collections::BTreeMap;

    pub(crate) fn container(ready: bool) -> ContainerStatus {
        ContainerStatus {
            ready,
            ..Default::default()
        }
    }

    pub(crate) fn ready_condition(status: &str) -> PodCondition {
        PodCondition {
            type_: POD_READY_CONDITION.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn fake_pod(
        name: &str,
        node_name: &str,
        annotations: BTreeMap<String, String>,
        containers: Vec<ContainerStatus>,
        conditions: Vec<PodCondition>,
    ) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("startup".to_string()),
                labels: Some(btreemap! {
                    STARTUP_POD_LABEL_KEY.to_string() => STARTUP_POD_LABEL_VALUE.to_string(),
                }),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node_name.to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                container_statuses: Some(containers),
                conditions: Some(conditions),
                ..Default::default()
            }),
        }
    }

    fn ready_annotation() -> BTreeMap<String, String> {
        btreemap! {
            STARTUP_POD_READY_ANNOTATION.to_string() => STARTUP_POD_READY_ANNOTATION_VALUE.to_string(),
        }
    }

    #[test]
    fn test_startup_pod_complete() {
        let test_cases = vec![
            // Annotation overrides container and condition state.
            (
                fake_pod(
                    "p",
                    "n1",
                    ready_annotation(),
                    vec![container(false), container(false)],
                    vec![ready_condition("False")],
                ),
                true,
            ),
            // Annotation must be exactly "true".
            (
                fake_pod(
                    "p",
                    "n1",
                    btreemap! { STARTUP_POD_READY_ANNOTATION.to_string() => "True".to_string() },
                    vec![],
                    vec![],
                ),
                false,
            ),
            // All containers ready but the pod has no Ready condition.
            (
                fake_pod("p", "n1", BTreeMap::new(), vec![container(true)], vec![]),
                false,
            ),
            // Ready condition but one container not ready.
            (
                fake_pod(
                    "p",
                    "n1",
                    BTreeMap::new(),
                    vec![container(true), container(false)],
                    vec![ready_condition("True")],
                ),
                false,
            ),
            (
                fake_pod(
                    "p",
                    "n1",
                    BTreeMap::new(),
                    vec![container(true), container(true)],
                    vec![ready_condition("True")],
                ),
                true,
            ),
            // No containers, no conditions.
            (fake_pod("p", "n1", BTreeMap::new(), vec![], vec![]), false),
            (
                fake_pod(
                    "p",
                    "n1",
                    BTreeMap::new(),
                    vec![container(true)],
                    vec![ready_condition("False")],
                ),
                false,
            ),
        ];

        for (pod, expected) in test_cases {
            assert_eq!(startup_pod_complete(&pod), expected, "{:?}", pod);
        }
    }

    #[test]
    fn test_pod_without_status_is_incomplete() {
        let mut pod = fake_pod("p", "n1", BTreeMap::new(), vec![], vec![]);
        pod.status = None;
        assert!(!startup_pod_complete(&pod));
    }

    #[test]
    fn test_any_startup_pod_complete_is_order_independent() {
        let done = fake_pod(
            "done",
            "n1",
            BTreeMap::new(),
            vec![container(true)],
            vec![ready_condition("True")],
        );
        let pending = fake_pod("pending", "n1", BTreeMap::new(), vec![container(false)], vec![]);

        assert!(any_startup_pod_complete(&[done.clone(), pending.clone()], "n1"));
        assert!(any_startup_pod_complete(&[pending.clone(), done], "n1"));
        assert!(!any_startup_pod_complete(&[pending], "n1"));
        assert!(!any_startup_pod_complete(&Vec::<Pod>::new(), "n1"));
    }

    #[test]
    fn test_any_startup_pod_complete_ignores_unrelated_pods() {
        let mut unlabelled = fake_pod("p", "n1", ready_annotation(), vec![], vec![]);
        unlabelled.metadata.labels = None;
        let elsewhere = fake_pod("p", "n2", ready_annotation(), vec![], vec![]);

        assert!(!any_startup_pod_complete(&[unlabelled, elsewhere], "n1"));
    }

    #[test]
    fn test_bound_node() {
        let pod = fake_pod("p", "n1", BTreeMap::new(), vec![], vec![]);
        assert_eq!(bound_node(&pod), Some("n1"));

        let unscheduled = fake_pod("p", "", BTreeMap::new(), vec![], vec![]);
        assert_eq!(bound_node(&unscheduled), None);
        assert_eq!(bound_node(&Pod::default()), None);
    }

    #[test]
    fn test_hosts_workload_pods() {
        let in_namespace = |namespace: &str| {
            let mut pod = Pod::default();
            pod.metadata.namespace = Some(namespace.to_string());
            pod
        };

        assert!(!hosts_workload_pods(&Vec::<Pod>::new()));
        assert!(!hosts_workload_pods(&[
            in_namespace("kube-system"),
            in_namespace("kube-public")
        ]));
        assert!(hosts_workload_pods(&[
            in_namespace("kube-system"),
            in_namespace("default")
        ]));
    }
}
