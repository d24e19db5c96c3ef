//! Logging and monitoring agents.

use async_trait::async_trait;
use tracing::debug;

use super::{Check, CheckContext, CheckOutcome, Contribution};
use crate::accessor::PodQuery;
use crate::error::CheckError;
use crate::model::{Category, LoggingStatus, PodStatus};

pub struct LoggingAgentsCheck;

/// Agents are looked up cluster-wide; they rarely live in workload namespaces.
async fn agent_pods(
    ctx: &CheckContext,
    key: &str,
    value: &str,
) -> Result<Vec<PodStatus>, CheckError> {
    let pods = ctx
        .cluster
        .list_pods(&PodQuery::all().label(key, value))
        .await?;
    debug!(selector = %format!("{key}={value}"), count = pods.len(), "Agent pods");
    Ok(pods.iter().map(PodStatus::from).collect())
}

#[async_trait]
impl Check for LoggingAgentsCheck {
    fn category(&self) -> Category {
        Category::Logging
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let status = LoggingStatus {
            log_shipper: agent_pods(ctx, "app", "fluent-bit").await?,
            metrics_forwarder: agent_pods(ctx, "app", "cloudwatch-agent").await?,
            metrics_server: agent_pods(ctx, "k8s-app", "metrics-server").await?,
        };
        Ok(Contribution::Logging(status).into())
    }
}
