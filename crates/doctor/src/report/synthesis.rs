//! Snapshot to report.
//!
//! Only categories that were evaluated contribute findings; a failed or
//! skipped category has default fields that must not read as evidence.

use std::collections::BTreeSet;

use chrono::Utc;

use super::{Finding, FindingKind, HealthReport};
use crate::model::{Category, ClusterHealthStatus, HealthRun, WorkloadKind};

/// Classify the snapshot of `run` into a report for `cluster`.
#[must_use]
pub fn synthesize(cluster: &str, run: &HealthRun) -> HealthReport {
    let mut findings = Vec::new();
    let status = &run.status;

    // Numbered rules, in order.
    if run.is_evaluated(Category::Versions) {
        version_skew(status, &mut findings);
    }
    if run.is_evaluated(Category::DeprecatedApis) {
        for api in &status.deprecated_apis {
            findings.push(Finding::new(Category::DeprecatedApis, FindingKind::DeprecatedApi, api));
        }
    }
    if run.is_evaluated(Category::Auth) {
        let auth = &status.auth;
        findings.extend(
            auth.irsa_issues
                .iter()
                .map(|m| Finding::new(Category::Auth, FindingKind::IrsaIssue, m)),
        );
        findings.extend(
            auth.rbac_issues
                .iter()
                .map(|m| Finding::new(Category::Auth, FindingKind::RbacIssue, m)),
        );
    }
    if run.is_evaluated(Category::Nodes) {
        for node in &status.nodes.not_ready {
            findings.push(Finding::new(
                Category::Nodes,
                FindingKind::NodeNotReady,
                format!("Node {node} is NotReady"),
            ));
        }
    }
    if run.is_evaluated(Category::Scheduling) {
        for pod in &status.scheduling.pending_pods {
            findings.push(Finding::new(
                Category::Scheduling,
                FindingKind::PendingPod,
                format!("Pod {}/{} is pending: {}", pod.namespace, pod.pod, pod.reason),
            ));
        }
    }
    if run.is_evaluated(Category::LoadBalancing) {
        for service in &status.load_balancers.pending_services {
            findings.push(Finding::new(
                Category::LoadBalancing,
                FindingKind::PendingLoadBalancer,
                format!("LoadBalancer service {service} has no address"),
            ));
        }
    }

    // Advisory rules.
    for category in Category::ALL {
        if run.is_evaluated(category) {
            advisories(category, status, &mut findings);
        }
    }

    let (critical_count, total_count, recommendations) = summarize(&findings);
    HealthReport {
        cluster: cluster.to_string(),
        generated_at: Utc::now(),
        critical_count,
        total_count,
        findings,
        recommendations,
        failures: run.failures.clone(),
        skipped: run.skipped.clone(),
        status: run.status.clone(),
    }
}

/// Counts and recommendations for a finding list.
///
/// Recommendations appear once per kind with at least one finding: counted
/// kinds first in rule order, then advisories, each text at most once.
pub(super) fn summarize(findings: &[Finding]) -> (usize, usize, Vec<String>) {
    let critical = findings.iter().filter(|f| f.kind.is_counted_critical()).count();
    let total = findings.iter().filter(|f| f.kind.is_counted()).count();

    let kinds: BTreeSet<FindingKind> = findings.iter().map(|f| f.kind).collect();
    let mut recommendations: Vec<String> = Vec::new();
    for kind in kinds {
        let text = kind.recommendation();
        if !recommendations.iter().any(|r| r == text) {
            recommendations.push(text.to_string());
        }
    }
    (critical, total, recommendations)
}

fn version_skew(status: &ClusterHealthStatus, findings: &mut Vec<Finding>) {
    if !status.has_version_skew() {
        return;
    }
    let fleet = status
        .node_versions
        .iter()
        .map(|(version, nodes)| {
            format!(
                "{version} ({})",
                nodes.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    findings.push(Finding::new(
        Category::Versions,
        FindingKind::VersionSkew,
        format!("Nodes run {} kubelet versions: {fleet}", status.node_versions.len()),
    ));
}

fn advisories(category: Category, status: &ClusterHealthStatus, findings: &mut Vec<Finding>) {
    let mut push = |kind: FindingKind, message: String| {
        findings.push(Finding::new(category, kind, message));
    };

    match category {
        Category::Versions => {
            let cp = &status.control_plane;
            let version = cp.version.as_deref().unwrap_or("unknown");
            for node in &cp.lagging_nodes {
                push(
                    FindingKind::ControlPlaneLag,
                    format!("Node {node} lags the control plane ({version})"),
                );
            }
            for issue in &cp.addon_issues {
                push(FindingKind::AddonIssue, issue.clone());
            }
            if let Some(throttling) = cp.throttling.filter(|t| t.throttled_requests > 0.0) {
                push(
                    FindingKind::ApiThrottling,
                    format!(
                        "API server throttled {:.0} of {:.0} requests in the last hour (peak {:.1}%)",
                        throttling.throttled_requests,
                        throttling.total_requests,
                        throttling.peak_throttle_percent
                    ),
                );
            }
        }
        Category::DeprecatedApis => {}
        Category::Logging => {
            for (agent, pods) in status.logging.agents() {
                if pods.is_empty() {
                    push(FindingKind::AgentMissing, format!("{agent} not detected"));
                    continue;
                }
                for pod in pods.iter().filter(|p| !p.is_running()) {
                    push(
                        FindingKind::AgentUnhealthy,
                        format!("{agent} pod {}/{} is {}", pod.namespace, pod.name, pod.phase),
                    );
                }
            }
        }
        Category::Networking => {
            let net = &status.networking;
            if !net.dns_resolution {
                push(
                    FindingKind::DnsResolutionFailed,
                    "In-cluster DNS resolution probe failed".to_string(),
                );
            }
            if !net.external_access {
                push(
                    FindingKind::ExternalAccessFailed,
                    "External reachability probe failed".to_string(),
                );
            }
            for (label, pods) in [("VPC CNI", &net.cni_pods), ("CoreDNS", &net.dns_pods)] {
                if pods.is_empty() {
                    push(FindingKind::NetworkPodUnhealthy, format!("No {label} pods found"));
                }
                for pod in pods.iter().filter(|p| !p.is_running()) {
                    push(
                        FindingKind::NetworkPodUnhealthy,
                        format!("{label} pod {}/{} is {}", pod.namespace, pod.name, pod.phase),
                    );
                }
            }
            for issue in &net.egress_issues {
                push(FindingKind::EgressIssue, issue.clone());
            }
        }
        Category::LoadBalancing => {
            for ingress in &status.load_balancers.ingresses {
                for problem in &ingress.problems {
                    push(
                        FindingKind::IngressPending,
                        format!("Ingress {}/{}: {problem}", ingress.namespace, ingress.name),
                    );
                }
            }
        }
        Category::Scheduling => {
            for issue in status.scheduling.resource_issues.iter().filter(|i| i.under_pressure) {
                push(
                    FindingKind::ResourcePressure,
                    format!(
                        "Node {} has {:.1}% CPU and {:.1}% memory requested",
                        issue.node_name, issue.cpu.utilization_percent, issue.memory.utilization_percent
                    ),
                );
            }
            for workload in &status.scheduling.workloads {
                let message = match workload.kind {
                    WorkloadKind::StatefulSet => format!(
                        "StatefulSet {}/{}: {}/{} replicas ready",
                        workload.namespace, workload.name, workload.ready, workload.desired
                    ),
                    WorkloadKind::DaemonSet => format!(
                        "DaemonSet {}/{}: {} pods unavailable",
                        workload.namespace, workload.name, workload.unavailable
                    ),
                };
                push(FindingKind::WorkloadNotReady, message);
            }
        }
        Category::Auth => {
            for issue in &status.auth.iam_auth_issues {
                push(FindingKind::IamAuthIssue, issue.clone());
            }
        }
        Category::Nodes => {
            for issue in &status.nodes.asg_issues {
                push(FindingKind::AsgIssue, issue.clone());
            }
            for issue in &status.nodes.bootstrap_issues {
                push(FindingKind::BootstrapIssue, issue.clone());
            }
        }
        Category::Storage => {
            let storage = &status.storage;
            for pvc in storage.unbound() {
                push(
                    FindingKind::StorageIssue,
                    format!("PVC {}/{} is {}", pvc.namespace, pvc.name, pvc.phase),
                );
            }
            if storage.storage_classes.is_empty() {
                push(FindingKind::StorageIssue, "No StorageClass defined".to_string());
            } else if !storage.has_default_class() {
                push(FindingKind::StorageIssue, "No default StorageClass".to_string());
            }
            for pod in storage.csi_controllers.iter().filter(|p| !p.is_running()) {
                push(
                    FindingKind::StorageIssue,
                    format!("CSI controller pod {}/{} is {}", pod.namespace, pod.name, pod.phase),
                );
            }
        }
        Category::Security => {
            let security = &status.security;
            if security.network_policy_count == 0 {
                push(FindingKind::NoNetworkPolicies, "No NetworkPolicies found".to_string());
            }
            for check in security.checks.iter().filter(|c| !c.passed) {
                push(
                    FindingKind::SecurityCheckFailed,
                    format!("{}: {}", check.name, check.message),
                );
            }
        }
    }
}
