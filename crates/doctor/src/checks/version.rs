//! Kubelet version skew and control plane state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doctor_cloud::{CloudAccessor, MetricQuery, Statistic};
use tracing::{debug, info, warn};

use super::{Check, CheckContext, CheckOutcome, Contribution};
use crate::error::CheckError;
use crate::model::{Category, ControlPlaneStatus, NodeVersions, ThrottlingSummary};

const METRIC_NAMESPACE: &str = "AWS/EKS";
const REQUESTS_METRIC: &str = "apiserver_request_total";
const THROTTLED_METRIC: &str = "apiserver_request_total_429";
const METRIC_PERIOD_SECS: u32 = 300;

pub struct VersionSkewCheck;

#[async_trait]
impl Check for VersionSkewCheck {
    fn category(&self) -> Category {
        Category::Versions
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let nodes = ctx.cluster.list_nodes().await?;

        let mut node_versions = NodeVersions::new();
        for node in &nodes {
            let name = node.metadata.name.clone().unwrap_or_default();
            let version = node
                .status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map_or_else(|| "unknown".to_string(), |i| i.kubelet_version.clone());
            node_versions.entry(version).or_default().insert(name);
        }

        if node_versions.len() > 1 {
            info!(
                versions = node_versions.len(),
                "Multiple kubelet versions in the fleet"
            );
        }

        let mut degraded = Vec::new();
        let control_plane = match &ctx.cloud {
            Some(cloud) => {
                control_plane_status(cloud, &ctx.config.cluster_name, &node_versions, &mut degraded)
                    .await
            }
            None => ControlPlaneStatus::default(),
        };

        Ok(CheckOutcome {
            contribution: Contribution::Versions {
                node_versions,
                control_plane,
            },
            degraded,
        })
    }
}

/// Cloud-side control plane view. Each lookup that fails leaves its part
/// empty and is recorded in `degraded`.
async fn control_plane_status(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
    node_versions: &NodeVersions,
    degraded: &mut Vec<CheckError>,
) -> ControlPlaneStatus {
    let mut status = ControlPlaneStatus::default();

    match cloud.describe_cluster(cluster).await {
        Ok(described) => {
            if let Some(cp) = described.version.as_deref().and_then(minor_version) {
                for (version, nodes) in node_versions {
                    if minor_version(version).is_some_and(|v| v < cp) {
                        status
                            .lagging_nodes
                            .extend(nodes.iter().map(|n| format!("{n} ({version})")));
                    }
                }
            }
            status.version = described.version;
        }
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "Control plane version unavailable");
            degraded.push(e.into());
        }
    }

    match addon_issues(cloud, cluster).await {
        Ok(issues) => status.addon_issues = issues,
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "Add-on health unavailable");
            degraded.push(e);
        }
    }

    match throttling(cloud, cluster).await {
        Ok(throttling) => status.throttling = throttling,
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "API throttling metrics unavailable");
            degraded.push(e);
        }
    }

    debug!(cluster = %cluster, lagging = status.lagging_nodes.len(), "Control plane evaluated");
    status
}

async fn addon_issues(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
) -> Result<Vec<String>, CheckError> {
    let mut issues = Vec::new();
    for name in cloud.list_addons(cluster).await? {
        let addon = cloud.describe_addon(cluster, &name).await?;
        let state = addon.status.as_deref().unwrap_or("UNKNOWN");
        if state != "ACTIVE" {
            issues.push(format!("Add-on {name} is {state}"));
        }
        for issue in addon.health.iter().flat_map(|h| &h.issues) {
            issues.push(format!(
                "Add-on {name}: {} - {}",
                issue.code.as_deref().unwrap_or("Unknown"),
                issue.message.as_deref().unwrap_or_default()
            ));
        }
    }
    Ok(issues)
}

async fn throttling(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
) -> Result<Option<ThrottlingSummary>, CheckError> {
    let query = |metric: &str| {
        MetricQuery::trailing(
            METRIC_NAMESPACE,
            metric,
            chrono::Duration::hours(1),
            METRIC_PERIOD_SECS,
            Statistic::Sum,
        )
        .with_dimension("ClusterName", cluster)
    };

    let requests = cloud.metric_statistics(&query(REQUESTS_METRIC)).await?;
    let throttled = cloud.metric_statistics(&query(THROTTLED_METRIC)).await?;
    if requests.is_empty() && throttled.is_empty() {
        return Ok(None);
    }

    let by_time: BTreeMap<DateTime<Utc>, f64> =
        requests.iter().map(|p| (p.timestamp, p.value)).collect();
    let peak_throttle_percent = throttled
        .iter()
        .filter_map(|p| {
            by_time
                .get(&p.timestamp)
                .filter(|total| **total > 0.0)
                .map(|total| p.value / total * 100.0)
        })
        .fold(0.0_f64, f64::max);

    Ok(Some(ThrottlingSummary {
        total_requests: requests.iter().map(|p| p.value).sum(),
        throttled_requests: throttled.iter().map(|p| p.value).sum(),
        peak_throttle_percent,
    }))
}

/// `(major, minor)` of `v1.28.3-eks-1234` or `1.29`.
fn minor_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    Some((major, minor.parse().ok()?))
}
