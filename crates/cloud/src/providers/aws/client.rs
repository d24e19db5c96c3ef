//! AWS accessor implementation.
//!
//! Requests go through the `aws` command line tool with `--output json`, so
//! credentials resolve exactly as they do for the operator's own shell.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::{debug, warn};

use super::models::{
    Addon, DescribeAddonOutput, DescribeClusterOutput, DescribeNatGatewaysOutput,
    DescribeNodegroupOutput, DescribeRouteTablesOutput, DescribeSecurityGroupRulesOutput,
    EksCluster, GetMetricStatisticsOutput, GetRoleOutput, IamRole, ListAddonsOutput,
    ListNodegroupsOutput, NatGateway, Nodegroup, RouteTable, SecurityGroupRule,
};
use crate::providers::traits::{CloudAccessor, CloudError, MetricPoint, MetricQuery, Statistic};

/// Default timeout for a single CLI invocation.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error codes the CLI reports for permission failures.
const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnrecognizedClientException",
    "ExpiredToken",
];

/// Error codes the CLI reports for missing resources.
const NOT_FOUND_CODES: &[&str] = &["NoSuchEntity", "ResourceNotFoundException", "NotFound"];

/// AWS accessor backed by the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCli {
    /// Executable to invoke.
    binary: String,
    /// Region passed as `--region`.
    region: Option<String>,
    /// Named profile passed as `--profile`.
    profile: Option<String>,
    /// Per-invocation timeout.
    timeout: Duration,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self {
            binary: "aws".to_string(),
            region: None,
            profile: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AwsCli {
    /// Create an accessor for the given region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Use a named profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Override the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the executable (e.g. a wrapper script).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Region this accessor targets.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = vec!["--output".to_string(), "json".to_string()];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    /// Run one CLI operation and decode its JSON output.
    async fn invoke<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<T, CloudError> {
        let command = format!("{service} {operation}");
        debug!(command = %command, "aws request");

        let mut cmd = Command::new(&self.binary);
        cmd.arg(service)
            .arg(operation)
            .args(args)
            .args(self.global_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CloudError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = classify_failure(&command, &stderr);
            warn!(command = %command, error = %error, "aws request failed");
            return Err(error);
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Map CLI stderr onto an error kind.
fn classify_failure(command: &str, stderr: &str) -> CloudError {
    let message = stderr.trim().to_string();
    let code = error_code(&message);

    if code.is_some_and(|c| ACCESS_DENIED_CODES.contains(&c))
        || message.contains("not authorized to perform")
    {
        return CloudError::AccessDenied(message);
    }
    if code.is_some_and(|c| NOT_FOUND_CODES.contains(&c)) {
        return CloudError::NotFound(message);
    }
    CloudError::Command {
        command: command.to_string(),
        message,
    }
}

/// Extract the code from "An error occurred (Code) when calling ...".
fn error_code(message: &str) -> Option<&str> {
    let start = message.find("An error occurred (")? + "An error occurred (".len();
    let rest = &message[start..];
    let end = rest.find(')')?;
    Some(&rest[..end])
}

fn filter_arg(name: &str, value: &str) -> String {
    format!("Name={name},Values={value}")
}

fn select(statistic: Statistic, point: &super::models::Datapoint) -> Option<f64> {
    match statistic {
        Statistic::Sum => point.sum,
        Statistic::Average => point.average,
        Statistic::Maximum => point.maximum,
        Statistic::Minimum => point.minimum,
        Statistic::SampleCount => point.sample_count,
    }
}

fn to_points(output: GetMetricStatisticsOutput, statistic: Statistic) -> Vec<MetricPoint> {
    let mut points: Vec<MetricPoint> = output
        .datapoints
        .iter()
        .filter_map(|p| {
            select(statistic, p).map(|value| MetricPoint {
                timestamp: p.timestamp,
                value,
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

#[async_trait]
impl CloudAccessor for AwsCli {
    async fn describe_cluster(&self, name: &str) -> Result<EksCluster, CloudError> {
        let out: DescribeClusterOutput = self
            .invoke("eks", "describe-cluster", &owned(&["--name", name]))
            .await?;
        Ok(out.cluster)
    }

    async fn list_nodegroups(&self, cluster: &str) -> Result<Vec<String>, CloudError> {
        let out: ListNodegroupsOutput = self
            .invoke(
                "eks",
                "list-nodegroups",
                &owned(&["--cluster-name", cluster]),
            )
            .await?;
        Ok(out.nodegroups)
    }

    async fn describe_nodegroup(
        &self,
        cluster: &str,
        nodegroup: &str,
    ) -> Result<Nodegroup, CloudError> {
        let out: DescribeNodegroupOutput = self
            .invoke(
                "eks",
                "describe-nodegroup",
                &owned(&["--cluster-name", cluster, "--nodegroup-name", nodegroup]),
            )
            .await?;
        Ok(out.nodegroup)
    }

    async fn list_addons(&self, cluster: &str) -> Result<Vec<String>, CloudError> {
        let out: ListAddonsOutput = self
            .invoke("eks", "list-addons", &owned(&["--cluster-name", cluster]))
            .await?;
        Ok(out.addons)
    }

    async fn describe_addon(&self, cluster: &str, addon: &str) -> Result<Addon, CloudError> {
        let out: DescribeAddonOutput = self
            .invoke(
                "eks",
                "describe-addon",
                &owned(&["--cluster-name", cluster, "--addon-name", addon]),
            )
            .await?;
        Ok(out.addon)
    }

    async fn get_role(&self, role_name: &str) -> Result<IamRole, CloudError> {
        let out: GetRoleOutput = self
            .invoke("iam", "get-role", &owned(&["--role-name", role_name]))
            .await?;
        Ok(out.role)
    }

    async fn metric_statistics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<MetricPoint>, CloudError> {
        let mut args = vec![
            "--namespace".to_string(),
            query.namespace.clone(),
            "--metric-name".to_string(),
            query.metric_name.clone(),
            "--start-time".to_string(),
            query.start.to_rfc3339(),
            "--end-time".to_string(),
            query.end.to_rfc3339(),
            "--period".to_string(),
            query.period_secs.to_string(),
            "--statistics".to_string(),
            query.statistic.as_str().to_string(),
        ];
        if !query.dimensions.is_empty() {
            args.push("--dimensions".to_string());
            args.extend(
                query
                    .dimensions
                    .iter()
                    .map(|(name, value)| format!("Name={name},Value={value}")),
            );
        }

        let out: GetMetricStatisticsOutput = self
            .invoke("cloudwatch", "get-metric-statistics", &args)
            .await?;
        Ok(to_points(out, query.statistic))
    }

    async fn nat_gateways(&self, vpc_id: &str) -> Result<Vec<NatGateway>, CloudError> {
        let out: DescribeNatGatewaysOutput = self
            .invoke(
                "ec2",
                "describe-nat-gateways",
                &["--filter".to_string(), filter_arg("vpc-id", vpc_id)],
            )
            .await?;
        Ok(out.nat_gateways)
    }

    async fn security_group_rules(
        &self,
        group_id: &str,
    ) -> Result<Vec<SecurityGroupRule>, CloudError> {
        let out: DescribeSecurityGroupRulesOutput = self
            .invoke(
                "ec2",
                "describe-security-group-rules",
                &["--filters".to_string(), filter_arg("group-id", group_id)],
            )
            .await?;
        Ok(out.security_group_rules)
    }

    async fn route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTable>, CloudError> {
        let out: DescribeRouteTablesOutput = self
            .invoke(
                "ec2",
                "describe-route-tables",
                &["--filters".to_string(), filter_arg("vpc-id", vpc_id)],
            )
            .await?;
        Ok(out.route_tables)
    }
}
