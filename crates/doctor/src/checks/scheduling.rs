//! Pending pods, per-node request allocation and controller readiness.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{debug, warn};

use super::{qualified_name, Check, CheckContext, CheckOutcome, Contribution};
use crate::accessor::PodQuery;
use crate::error::CheckError;
use crate::model::{
    Category, PendingPod, ResourceIssue, ResourceStats, SchedulingStatus, WorkloadKind,
    WorkloadStatus,
};
use crate::quantity::{cpu_millis, memory_bytes};

pub struct SchedulingCheck;

#[async_trait]
impl Check for SchedulingCheck {
    fn category(&self) -> Category {
        Category::Scheduling
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let namespace = ctx.config.namespace();
        let pending = ctx
            .cluster
            .list_pods(&PodQuery::in_namespace(namespace).phase("Pending"))
            .await?;
        let pending_pods = pending.iter().filter_map(unscheduled).collect();

        // Allocation needs every pod on a node regardless of the namespace filter.
        let nodes = ctx.cluster.list_nodes().await?;
        let pods = ctx.cluster.list_pods(&PodQuery::all()).await?;
        let threshold = ctx.config.settings.utilization_warn_percent;
        let resource_issues = allocation(&nodes, &pods, threshold);

        let mut workloads: Vec<WorkloadStatus> = ctx
            .cluster
            .list_stateful_sets(namespace)
            .await?
            .iter()
            .map(stateful_set_status)
            .collect();
        workloads.extend(
            ctx.cluster
                .list_daemon_sets(namespace)
                .await?
                .iter()
                .map(daemon_set_status),
        );
        workloads.retain(|w| !w.is_ready());
        if !workloads.is_empty() {
            debug!(count = workloads.len(), "Workloads not fully ready");
        }

        Ok(Contribution::Scheduling(SchedulingStatus {
            pending_pods,
            resource_issues,
            workloads,
        })
        .into())
    }
}

/// Ready replicas against `spec.replicas`, which defaults to 1.
fn stateful_set_status(set: &StatefulSet) -> WorkloadStatus {
    WorkloadStatus {
        kind: WorkloadKind::StatefulSet,
        namespace: set.metadata.namespace.clone().unwrap_or_default(),
        name: set.metadata.name.clone().unwrap_or_default(),
        ready: set
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
        desired: set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        unavailable: 0,
    }
}

fn daemon_set_status(set: &DaemonSet) -> WorkloadStatus {
    let status = set.status.as_ref();
    WorkloadStatus {
        kind: WorkloadKind::DaemonSet,
        namespace: set.metadata.namespace.clone().unwrap_or_default(),
        name: set.metadata.name.clone().unwrap_or_default(),
        ready: status.map_or(0, |s| s.number_ready),
        desired: status.map_or(0, |s| s.desired_number_scheduled),
        unavailable: status.and_then(|s| s.number_unavailable).unwrap_or(0),
    }
}

/// A pending pod the scheduler has rejected.
fn unscheduled(pod: &Pod) -> Option<PendingPod> {
    let condition = pod
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "PodScheduled" && c.status == "False")?;

    Some(PendingPod {
        pod: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        reason: condition
            .message
            .clone()
            .or_else(|| condition.reason.clone())
            .unwrap_or_else(|| "Unschedulable".to_string()),
    })
}

fn is_terminated(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}

/// A quantity in base units. Missing is zero; unparseable is logged and
/// counted as zero.
fn parsed(
    object: &str,
    resource: &str,
    quantity: Option<&Quantity>,
    parse: fn(&str) -> Option<u64>,
) -> u64 {
    let Some(quantity) = quantity else {
        return 0;
    };
    parse(&quantity.0).unwrap_or_else(|| {
        warn!(object = %object, resource, value = %quantity.0, "Unparseable quantity, counting as zero");
        0
    })
}

/// Sum of container requests as `(millicores, bytes)`.
fn requests(pod: &Pod) -> (u64, u64) {
    let Some(spec) = pod.spec.as_ref() else {
        return (0, 0);
    };
    let name = qualified_name(&pod.metadata);
    spec.containers
        .iter()
        .filter_map(|c| c.resources.as_ref()?.requests.as_ref())
        .fold((0, 0), |(cpu, mem), req| {
            (
                cpu + parsed(&name, "cpu", req.get("cpu"), cpu_millis),
                mem + parsed(&name, "memory", req.get("memory"), memory_bytes),
            )
        })
}

fn allocation(nodes: &[Node], pods: &[Pod], threshold: f64) -> Vec<ResourceIssue> {
    let mut by_node: HashMap<&str, (u64, u64)> = HashMap::new();
    for pod in pods.iter().filter(|p| !is_terminated(p)) {
        let Some(node) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
            continue;
        };
        let (cpu, mem) = requests(pod);
        let entry = by_node.entry(node).or_default();
        entry.0 += cpu;
        entry.1 += mem;
    }

    nodes
        .iter()
        .map(|node| {
            let name = node.metadata.name.clone().unwrap_or_default();
            let capacity = node.status.as_ref().and_then(|s| s.capacity.as_ref());
            let cpu_capacity = parsed(&name, "cpu", capacity.and_then(|c| c.get("cpu")), cpu_millis);
            let memory_capacity = parsed(
                &name,
                "memory",
                capacity.and_then(|c| c.get("memory")),
                memory_bytes,
            );
            let (cpu, mem) = by_node.get(name.as_str()).copied().unwrap_or_default();

            let cpu = ResourceStats::new(cpu_capacity, cpu);
            let memory = ResourceStats::new(memory_capacity, mem);
            let under_pressure =
                cpu.utilization_percent > threshold || memory.utilization_percent > threshold;
            if under_pressure {
                debug!(node = %name, cpu = cpu.utilization_percent, memory = memory.utilization_percent, "Node under pressure");
            }
            ResourceIssue {
                node_name: name,
                cpu,
                memory,
                under_pressure,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::fixture::{obj, FixtureCluster};
    use crate::checks::testing::context;

    fn node(name: &str, cpu: &str, memory: &str) -> serde_json::Value {
        serde_json::json!({
            "metadata": {"name": name},
            "status": {"capacity": {"cpu": cpu, "memory": memory}}
        })
    }

    fn bound_pod(name: &str, node: &str, cpu: &str, memory: &str, phase: &str) -> serde_json::Value {
        serde_json::json!({
            "metadata": {"name": name, "namespace": "default"},
            "spec": {
                "nodeName": node,
                "containers": [{
                    "name": "main",
                    "resources": {"requests": {"cpu": cpu, "memory": memory}}
                }]
            },
            "status": {"phase": phase}
        })
    }

    #[tokio::test]
    async fn test_allocation_percentages() {
        let mut cluster = FixtureCluster::new();
        cluster.nodes = vec![obj(node("n1", "4000m", "8Gi"))];
        cluster.pods = vec![obj(bound_pod("web", "n1", "1000m", "1Gi", "Running"))];

        let outcome = SchedulingCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Scheduling(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        let issue = &status.resource_issues[0];
        assert_eq!(issue.node_name, "n1");
        assert_eq!(issue.cpu.capacity, 4000);
        assert_eq!(issue.cpu.allocated, 1000);
        assert!((issue.cpu.utilization_percent - 25.0).abs() < 1e-9);
        assert!((issue.memory.utilization_percent - 12.5).abs() < 1e-9);
        assert!(!issue.under_pressure);
        assert!(status.pending_pods.is_empty());
    }

    #[tokio::test]
    async fn test_terminated_pods_not_counted_and_pressure_flagged() {
        let mut cluster = FixtureCluster::new();
        cluster.nodes = vec![obj(node("n1", "2", "4Gi"))];
        cluster.pods = vec![
            obj(bound_pod("busy", "n1", "1800m", "1Gi", "Running")),
            obj(bound_pod("done", "n1", "2", "2Gi", "Succeeded")),
        ];

        let outcome = SchedulingCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Scheduling(status) = outcome.contribution else {
            panic!("wrong contribution");
        };
        let issue = &status.resource_issues[0];
        assert_eq!(issue.cpu.allocated, 1800);
        assert!((issue.cpu.utilization_percent - 90.0).abs() < 1e-9);
        assert!(issue.under_pressure);
    }

    #[tokio::test]
    async fn test_pending_pods_need_unscheduled_condition() {
        let mut cluster = FixtureCluster::new();
        cluster.pods = vec![
            obj(serde_json::json!({
                "metadata": {"name": "big", "namespace": "batch"},
                "spec": {"containers": [{"name": "main"}]},
                "status": {
                    "phase": "Pending",
                    "conditions": [{
                        "type": "PodScheduled",
                        "status": "False",
                        "reason": "Unschedulable",
                        "message": "0/3 nodes are available: 3 Insufficient cpu."
                    }]
                }
            })),
            obj(serde_json::json!({
                "metadata": {"name": "pulling", "namespace": "batch"},
                "spec": {"containers": [{"name": "main"}]},
                "status": {
                    "phase": "Pending",
                    "conditions": [{"type": "PodScheduled", "status": "True"}]
                }
            })),
        ];

        let outcome = SchedulingCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Scheduling(status) = outcome.contribution else {
            panic!("wrong contribution");
        };
        assert_eq!(
            status.pending_pods,
            vec![PendingPod {
                pod: "big".to_string(),
                namespace: "batch".to_string(),
                reason: "0/3 nodes are available: 3 Insufficient cpu.".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_exponent_quantities_and_unparseable_requests() {
        let mut cluster = FixtureCluster::new();
        cluster.nodes = vec![obj(node("n1", "4", "1e9"))];
        cluster.pods = vec![
            obj(bound_pod("web", "n1", "1e0", "129e6", "Running")),
            obj(bound_pod("odd", "n1", "lots", "1Gi", "Running")),
        ];

        let outcome = SchedulingCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Scheduling(status) = outcome.contribution else {
            panic!("wrong contribution");
        };
        let issue = &status.resource_issues[0];
        assert_eq!(issue.cpu.allocated, 1000);
        assert_eq!(issue.memory.capacity, 1_000_000_000);
        assert_eq!(issue.memory.allocated, 129_000_000 + 1024 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_unready_stateful_and_daemon_sets() {
        let mut cluster = FixtureCluster::new();
        cluster.stateful_sets = vec![
            obj(serde_json::json!({
                "metadata": {"name": "pg", "namespace": "db"},
                "spec": {"replicas": 3, "serviceName": "pg", "selector": {}, "template": {}},
                "status": {"replicas": 3, "readyReplicas": 1}
            })),
            obj(serde_json::json!({
                "metadata": {"name": "cache", "namespace": "db"},
                "spec": {"replicas": 2, "serviceName": "cache", "selector": {}, "template": {}},
                "status": {"replicas": 2, "readyReplicas": 2}
            })),
            obj(serde_json::json!({
                "metadata": {"name": "fresh", "namespace": "db"},
                "spec": {"serviceName": "fresh", "selector": {}, "template": {}}
            })),
        ];
        cluster.daemon_sets = vec![
            obj(serde_json::json!({
                "metadata": {"name": "ebs-csi-node", "namespace": "kube-system"},
                "spec": {"selector": {}, "template": {}},
                "status": {
                    "currentNumberScheduled": 3,
                    "desiredNumberScheduled": 3,
                    "numberMisscheduled": 0,
                    "numberReady": 2,
                    "numberUnavailable": 1
                }
            })),
            obj(serde_json::json!({
                "metadata": {"name": "aws-node", "namespace": "kube-system"},
                "spec": {"selector": {}, "template": {}},
                "status": {
                    "currentNumberScheduled": 3,
                    "desiredNumberScheduled": 3,
                    "numberMisscheduled": 0,
                    "numberReady": 3
                }
            })),
        ];

        let outcome = SchedulingCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Scheduling(status) = outcome.contribution else {
            panic!("wrong contribution");
        };
        let summary: Vec<(WorkloadKind, &str, i32, i32, i32)> = status
            .workloads
            .iter()
            .map(|w| (w.kind, w.name.as_str(), w.ready, w.desired, w.unavailable))
            .collect();
        assert_eq!(
            summary,
            vec![
                (WorkloadKind::StatefulSet, "pg", 1, 3, 0),
                (WorkloadKind::StatefulSet, "fresh", 0, 1, 0),
                (WorkloadKind::DaemonSet, "ebs-csi-node", 2, 3, 1),
            ]
        );
    }
}
