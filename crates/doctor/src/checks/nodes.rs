//! Node readiness, bootstrap conditions and managed node groups.

use std::sync::Arc;

use async_trait::async_trait;
use doctor_cloud::aws::Nodegroup;
use doctor_cloud::CloudAccessor;
use k8s_openapi::api::core::v1::{Node, NodeCondition};
use tracing::{debug, warn};

use super::{Check, CheckContext, CheckOutcome, Contribution};
use crate::error::CheckError;
use crate::model::{Category, NodeStatus};

const PRESSURE_CONDITIONS: &[&str] = &[
    "MemoryPressure",
    "DiskPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

pub struct NodeReadinessCheck;

#[async_trait]
impl Check for NodeReadinessCheck {
    fn category(&self) -> Category {
        Category::Nodes
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let nodes = ctx.cluster.list_nodes().await?;
        let mut status = NodeStatus::default();

        for node in &nodes {
            if is_ready(node) {
                continue;
            }
            let name = node.metadata.name.clone().unwrap_or_default();
            debug!(node = %name, "Node not ready");
            status
                .bootstrap_issues
                .extend(conditions(node).filter(|c| is_bootstrap_issue(c)).map(|c| {
                    format!(
                        "Node {name}: {} - {}",
                        c.type_,
                        c.message.as_deref().unwrap_or_default()
                    )
                }));
            status.not_ready.push(name);
        }

        let mut degraded = Vec::new();
        if let Some(cloud) = &ctx.cloud {
            status.asg_issues =
                nodegroup_issues(cloud, &ctx.config.cluster_name, &mut degraded).await;
        }

        Ok(CheckOutcome {
            contribution: Contribution::Nodes(status),
            degraded,
        })
    }
}

fn conditions(node: &Node) -> impl Iterator<Item = &NodeCondition> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
}

fn is_ready(node: &Node) -> bool {
    conditions(node).any(|c| c.type_ == "Ready" && c.status == "True")
}

/// Non-Ready conditions reporting `False`, plus pressure conditions reporting `True`.
fn is_bootstrap_issue(condition: &NodeCondition) -> bool {
    if condition.type_ == "Ready" {
        return false;
    }
    let pressure = PRESSURE_CONDITIONS.contains(&condition.type_.as_str());
    (pressure && condition.status == "True") || (!pressure && condition.status == "False")
}

/// Node groups that cannot be listed or described are skipped and recorded
/// in `degraded`.
async fn nodegroup_issues(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
    degraded: &mut Vec<CheckError>,
) -> Vec<String> {
    let mut issues = Vec::new();
    let names = match cloud.list_nodegroups(cluster).await {
        Ok(names) => names,
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "Node group listing unavailable");
            degraded.push(e.into());
            return issues;
        }
    };

    for name in names {
        let nodegroup = match cloud.describe_nodegroup(cluster, &name).await {
            Ok(nodegroup) => nodegroup,
            Err(e) => {
                warn!(nodegroup = %name, error = %e, "Node group unavailable");
                degraded.push(e.into());
                continue;
            }
        };
        match scaling_issues(&nodegroup) {
            Ok(found) => issues.extend(found),
            Err(e) => {
                warn!(nodegroup = %name, error = %e, "Malformed node group");
                issues.push(e.to_string());
            }
        }

        match nodegroup.status.as_deref() {
            Some("ACTIVE") => {}
            Some(state) => issues.push(format!("Node group {name} is {state}")),
            None => issues.push(format!("Node group {name} reports no status")),
        }

        let health = nodegroup.health.iter().flat_map(|h| &h.issues);
        for issue in health {
            issues.push(format!(
                "Node group {name}: {} - {}",
                issue.code.as_deref().unwrap_or("Unknown"),
                issue.message.as_deref().unwrap_or_default()
            ));
        }
    }
    issues
}

/// Bounds problems. A missing bound is a malformed node group.
fn scaling_issues(nodegroup: &Nodegroup) -> Result<Vec<String>, CheckError> {
    let name = &nodegroup.nodegroup_name;
    let malformed = || CheckError::MalformedResource {
        resource: format!("nodegroup/{name}"),
        detail: "invalid scaling configuration".to_string(),
    };
    let config = nodegroup.scaling_config.ok_or_else(malformed)?;
    let (Some(min), Some(max), Some(desired)) =
        (config.min_size, config.max_size, config.desired_size)
    else {
        return Err(malformed());
    };

    let mut issues = Vec::new();
    if min > max {
        issues.push(format!(
            "Node group {name} has min size {min} above max size {max}"
        ));
    } else if desired < min || desired > max {
        issues.push(format!(
            "Node group {name} desired size {desired} is outside {min}..={max}"
        ));
    }
    Ok(issues)
}
