//! Security posture: network policies, pod privileges and cluster hardening.

use std::sync::Arc;

use async_trait::async_trait;
use doctor_cloud::aws::{EksCluster, Nodegroup};
use doctor_cloud::CloudAccessor;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use super::{qualified_name, Check, CheckContext, CheckOutcome, Contribution};
use crate::accessor::PodQuery;
use crate::error::CheckError;
use crate::model::{Category, SecurityCheck, SecurityStatus};

const PRIVILEGED: &str = "Privileged containers";
const HOST_NETWORK: &str = "Host network";
const OPEN_CIDR: &str = "0.0.0.0/0";

pub struct SecurityPostureCheck;

#[async_trait]
impl Check for SecurityPostureCheck {
    fn category(&self) -> Category {
        Category::Security
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let namespace = ctx.config.namespace();
        let policies = ctx.cluster.list_network_policies(namespace).await?;
        let pods = ctx
            .cluster
            .list_pods(&PodQuery::in_namespace(namespace))
            .await?;

        let mut checks = pod_checks(&pods);
        let mut degraded = Vec::new();
        if let Some(cloud) = &ctx.cloud {
            checks.extend(cluster_checks(cloud, &ctx.config.cluster_name, &mut degraded).await);
        }
        debug!(
            policies = policies.len(),
            failed = checks.iter().filter(|c| !c.passed).count(),
            "Security posture evaluated"
        );

        Ok(CheckOutcome {
            contribution: Contribution::Security(SecurityStatus {
                network_policy_count: policies.len(),
                checks,
            }),
            degraded,
        })
    }
}

/// One failed entry per offending pod, or a single passing entry per rule.
fn pod_checks(pods: &[Pod]) -> Vec<SecurityCheck> {
    let workloads = pods
        .iter()
        .filter(|p| p.metadata.namespace.as_deref() != Some("kube-system"));

    let mut privileged = Vec::new();
    let mut host_network = Vec::new();
    for pod in workloads {
        let Some(spec) = pod.spec.as_ref() else {
            continue;
        };
        let name = qualified_name(&pod.metadata);
        for container in &spec.containers {
            let is_privileged = container
                .security_context
                .as_ref()
                .and_then(|s| s.privileged)
                .unwrap_or(false);
            if is_privileged {
                privileged.push(SecurityCheck::new(
                    PRIVILEGED,
                    false,
                    format!("Pod {name} runs privileged container {}", container.name),
                ));
            }
        }
        if spec.host_network == Some(true) {
            host_network.push(SecurityCheck::new(
                HOST_NETWORK,
                false,
                format!("Pod {name} uses the host network"),
            ));
        }
    }

    if privileged.is_empty() {
        privileged.push(SecurityCheck::new(
            PRIVILEGED,
            true,
            "No privileged containers outside kube-system",
        ));
    }
    if host_network.is_empty() {
        host_network.push(SecurityCheck::new(
            HOST_NETWORK,
            true,
            "No host-network pods outside kube-system",
        ));
    }
    privileged.extend(host_network);
    privileged
}

/// Cloud-side hardening. Lookups that fail drop their entries and are
/// recorded in `degraded`.
async fn cluster_checks(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
    degraded: &mut Vec<CheckError>,
) -> Vec<SecurityCheck> {
    let mut checks = match cloud.describe_cluster(cluster).await {
        Ok(described) => hardening_checks(&described),
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "Cluster hardening review unavailable");
            degraded.push(e.into());
            Vec::new()
        }
    };

    let names = match cloud.list_nodegroups(cluster).await {
        Ok(names) => names,
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "Node group listing unavailable");
            degraded.push(e.into());
            return checks;
        }
    };
    for name in names {
        match cloud.describe_nodegroup(cluster, &name).await {
            Ok(nodegroup) => checks.extend(nodegroup_checks(&name, &nodegroup)),
            Err(e) => {
                warn!(nodegroup = %name, error = %e, "Node group unavailable");
                degraded.push(e.into());
            }
        }
    }
    checks
}

fn hardening_checks(described: &EksCluster) -> Vec<SecurityCheck> {
    let mut checks = Vec::new();

    let encrypted = described
        .encryption_config
        .iter()
        .any(|c| c.resources.iter().any(|r| r == "secrets"));
    checks.push(if encrypted {
        SecurityCheck::new("Secrets encryption", true, "Secrets are envelope-encrypted with KMS")
    } else {
        SecurityCheck::new("Secrets encryption", false, "Secrets are not encrypted with KMS")
    });

    let vpc = described.resources_vpc_config.clone().unwrap_or_default();
    let endpoint = if vpc.endpoint_public_access != Some(true) {
        SecurityCheck::new("Public endpoint", true, "API endpoint is private")
    } else if vpc.public_access_cidrs.is_empty()
        || vpc.public_access_cidrs.iter().any(|c| c == OPEN_CIDR)
    {
        SecurityCheck::new(
            "Public endpoint",
            false,
            format!("API endpoint is public and open to {OPEN_CIDR}"),
        )
    } else {
        SecurityCheck::new(
            "Public endpoint",
            true,
            format!(
                "API endpoint is public, restricted to {}",
                vpc.public_access_cidrs.join(", ")
            ),
        )
    };
    checks.push(endpoint);

    checks.push(if described.logging_enabled() {
        SecurityCheck::new("Control plane logging", true, "Control plane logging is enabled")
    } else {
        SecurityCheck::new("Control plane logging", false, "Control plane logging is disabled")
    });
    checks
}

fn nodegroup_checks(name: &str, nodegroup: &Nodegroup) -> Vec<SecurityCheck> {
    let mut checks = Vec::new();
    if let Some(access) = &nodegroup.remote_access {
        let open = access.ec2_ssh_key.is_some() && access.source_security_groups.is_empty();
        checks.push(SecurityCheck::new(
            "Node group remote access",
            !open,
            if open {
                format!("Node group {name} allows SSH from any source")
            } else {
                format!("Node group {name} restricts SSH to source security groups")
            },
        ));
    }
    checks.push(match nodegroup.node_role.as_deref() {
        Some(role) => SecurityCheck::new(
            "Node group IAM role",
            true,
            format!("Node group {name} uses role {role}"),
        ),
        None => SecurityCheck::new(
            "Node group IAM role",
            false,
            format!("Node group {name} has no IAM role"),
        ),
    });
    checks
}
