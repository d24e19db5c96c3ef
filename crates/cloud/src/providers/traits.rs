//! Cloud accessor trait and common types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::aws::models::{
    Addon, EksCluster, IamRole, NatGateway, Nodegroup, RouteTable, SecurityGroupRule,
};

/// Errors that can occur while querying the cloud provider.
#[derive(Error, Debug)]
pub enum CloudError {
    /// The caller's identity is not allowed to perform the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The requested resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The provider rejected the request for another reason.
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    /// The provider tool could not be started.
    #[error("failed to run aws CLI: {0}")]
    Spawn(#[from] std::io::Error),

    /// The provider returned output we could not decode.
    #[error("failed to parse provider output: {0}")]
    Parse(#[from] serde_json::Error),

    /// The request did not complete in time.
    #[error("provider request timed out after {0} seconds")]
    Timeout(u64),
}

impl CloudError {
    /// Whether the failure is a permission problem rather than an outage.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    /// Whether the failure means the resource simply is not there.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Aggregation applied to each metric period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Sum,
    Average,
    Maximum,
    Minimum,
    SampleCount,
}

impl Statistic {
    /// Name understood by CloudWatch.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "Sum",
            Self::Average => "Average",
            Self::Maximum => "Maximum",
            Self::Minimum => "Minimum",
            Self::SampleCount => "SampleCount",
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric time-series query.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    /// Metric namespace (e.g., "AWS/EKS").
    pub namespace: String,
    /// Metric name.
    pub metric_name: String,
    /// Dimension name/value pairs.
    pub dimensions: Vec<(String, String)>,
    /// Start of the range (inclusive).
    pub start: DateTime<Utc>,
    /// End of the range (exclusive).
    pub end: DateTime<Utc>,
    /// Period length in seconds.
    pub period_secs: u32,
    /// Statistic to return per period.
    pub statistic: Statistic,
}

impl MetricQuery {
    /// Build a query over the trailing window ending now.
    #[must_use]
    pub fn trailing(
        namespace: impl Into<String>,
        metric_name: impl Into<String>,
        window: chrono::Duration,
        period_secs: u32,
        statistic: Statistic,
    ) -> Self {
        let end = Utc::now();
        Self {
            namespace: namespace.into(),
            metric_name: metric_name.into(),
            dimensions: Vec::new(),
            start: end - window,
            end,
            period_secs,
            statistic,
        }
    }

    /// Add a dimension filter.
    #[must_use]
    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.push((name.into(), value.into()));
        self
    }
}

/// One aggregated metric period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Read-only cloud provider queries used by the health checks.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait CloudAccessor: Send + Sync {
    // ========================================================================
    // EKS
    // ========================================================================

    /// Describe a managed cluster.
    async fn describe_cluster(&self, name: &str) -> Result<EksCluster, CloudError>;

    /// List node group names of a cluster.
    async fn list_nodegroups(&self, cluster: &str) -> Result<Vec<String>, CloudError>;

    /// Describe one node group.
    async fn describe_nodegroup(
        &self,
        cluster: &str,
        nodegroup: &str,
    ) -> Result<Nodegroup, CloudError>;

    /// List add-on names installed on a cluster.
    async fn list_addons(&self, cluster: &str) -> Result<Vec<String>, CloudError>;

    /// Describe one add-on.
    async fn describe_addon(&self, cluster: &str, addon: &str) -> Result<Addon, CloudError>;

    // ========================================================================
    // IAM
    // ========================================================================

    /// Fetch a role including its trust policy document.
    async fn get_role(&self, role_name: &str) -> Result<IamRole, CloudError>;

    // ========================================================================
    // CloudWatch
    // ========================================================================

    /// Query a metric series; points are returned oldest first.
    async fn metric_statistics(&self, query: &MetricQuery)
        -> Result<Vec<MetricPoint>, CloudError>;

    // ========================================================================
    // EC2
    // ========================================================================

    /// NAT gateways of a VPC.
    async fn nat_gateways(&self, vpc_id: &str) -> Result<Vec<NatGateway>, CloudError>;

    /// Rules of one security group.
    async fn security_group_rules(
        &self,
        group_id: &str,
    ) -> Result<Vec<SecurityGroupRule>, CloudError>;

    /// Route tables of a VPC.
    async fn route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTable>, CloudError>;
}
