//! AWS CLI response models.
//!
//! EKS responses are camelCase; IAM, CloudWatch and EC2 responses are
//! PascalCase. Only the fields the health checks read are modelled.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// EKS types
// ============================================================================

/// EKS cluster information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksCluster {
    /// Cluster name.
    pub name: String,
    /// Cluster ARN.
    pub arn: Option<String>,
    /// Control plane Kubernetes version (e.g., "1.29").
    pub version: Option<String>,
    /// Cluster status (e.g., "ACTIVE").
    pub status: Option<String>,
    /// API server endpoint.
    pub endpoint: Option<String>,
    /// Cluster IAM role ARN.
    pub role_arn: Option<String>,
    /// VPC configuration.
    pub resources_vpc_config: Option<VpcConfig>,
    /// Control plane logging setup.
    pub logging: Option<ClusterLogging>,
    /// Secrets envelope encryption.
    #[serde(default)]
    pub encryption_config: Vec<EncryptionConfig>,
    /// OIDC identity provider.
    pub identity: Option<ClusterIdentity>,
}

impl EksCluster {
    /// OIDC issuer URL, if the cluster has one.
    #[must_use]
    pub fn oidc_issuer(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .and_then(|i| i.oidc.as_ref())
            .and_then(|o| o.issuer.as_deref())
    }

    /// Whether any control plane log type is enabled.
    #[must_use]
    pub fn logging_enabled(&self) -> bool {
        self.logging.as_ref().is_some_and(|l| {
            l.cluster_logging
                .iter()
                .any(|setup| setup.enabled.unwrap_or(false) && !setup.types.is_empty())
        })
    }
}

/// VPC configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    /// Subnet IDs.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Additional security group IDs.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Cluster security group created by EKS.
    pub cluster_security_group_id: Option<String>,
    /// VPC ID.
    pub vpc_id: Option<String>,
    /// Public endpoint access enabled.
    pub endpoint_public_access: Option<bool>,
    /// Private endpoint access enabled.
    pub endpoint_private_access: Option<bool>,
    /// CIDRs allowed to reach the public endpoint.
    #[serde(default)]
    pub public_access_cidrs: Vec<String>,
}

/// Control plane logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLogging {
    #[serde(default)]
    pub cluster_logging: Vec<LogSetup>,
}

/// One group of log types and whether they are enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSetup {
    #[serde(default)]
    pub types: Vec<String>,
    pub enabled: Option<bool>,
}

/// Encryption configuration entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Cluster identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub oidc: Option<OidcIdentity>,
}

/// OIDC identity provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OidcIdentity {
    pub issuer: Option<String>,
}

/// EKS managed node group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nodegroup {
    /// Node group name.
    pub nodegroup_name: String,
    /// Status (e.g., "ACTIVE", "DEGRADED").
    pub status: Option<String>,
    /// Scaling configuration.
    pub scaling_config: Option<ScalingConfig>,
    /// Node IAM role ARN.
    pub node_role: Option<String>,
    /// SSH remote access configuration.
    pub remote_access: Option<RemoteAccess>,
    /// Health issues reported by EKS.
    pub health: Option<ResourceHealth>,
}

/// Scaling bounds. Any of them may be absent in a malformed node group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub min_size: Option<i32>,
    pub max_size: Option<i32>,
    pub desired_size: Option<i32>,
}

/// Remote access configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccess {
    pub ec2_ssh_key: Option<String>,
    #[serde(default)]
    pub source_security_groups: Vec<String>,
}

/// Health block shared by node groups and add-ons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceHealth {
    #[serde(default)]
    pub issues: Vec<HealthIssue>,
}

/// One reported health issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthIssue {
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub resource_ids: Vec<String>,
}

/// EKS add-on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    pub addon_name: String,
    pub addon_version: Option<String>,
    pub status: Option<String>,
    pub service_account_role_arn: Option<String>,
    pub health: Option<ResourceHealth>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeClusterOutput {
    pub cluster: EksCluster,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListNodegroupsOutput {
    #[serde(default)]
    pub nodegroups: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeNodegroupOutput {
    pub nodegroup: Nodegroup,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListAddonsOutput {
    #[serde(default)]
    pub addons: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeAddonOutput {
    pub addon: Addon,
}

// ============================================================================
// IAM types
// ============================================================================

/// IAM role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IamRole {
    pub role_name: String,
    pub arn: Option<String>,
    /// Trust policy; the CLI returns it already URL-decoded.
    pub assume_role_policy_document: Option<PolicyDocument>,
}

/// IAM policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: Option<String>,
    #[serde(default)]
    pub statement: OneOrMany<PolicyStatement>,
}

/// One policy statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: String,
    #[serde(default)]
    pub action: OneOrMany<String>,
    pub principal: Option<Principal>,
}

impl PolicyStatement {
    /// Whether this is an `Allow` statement granting `action`.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        self.effect.eq_ignore_ascii_case("allow")
            && self
                .action
                .iter()
                .any(|a| a == action || a == "*" || a == "sts:*")
    }

    /// Principal values of one kind ("Service", "Federated", "AWS").
    #[must_use]
    pub fn principals(&self, kind: &str) -> Vec<&str> {
        match &self.principal {
            Some(Principal::Wildcard(value)) => vec![value.as_str()],
            Some(Principal::Typed(map)) => map
                .get(kind)
                .map(|values| values.iter().map(String::as_str).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Statement principal: either `"*"` or a map keyed by principal type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Wildcard(String),
    Typed(BTreeMap<String, OneOrMany<String>>),
}

/// IAM fields that accept a single value or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::One(value) => std::slice::from_ref(value).iter(),
            Self::Many(values) => values.iter(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetRoleOutput {
    #[serde(rename = "Role")]
    pub role: IamRole,
}

// ============================================================================
// CloudWatch types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GetMetricStatisticsOutput {
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub sum: Option<f64>,
    pub average: Option<f64>,
    pub maximum: Option<f64>,
    pub minimum: Option<f64>,
    pub sample_count: Option<f64>,
}

// ============================================================================
// EC2 types
// ============================================================================

/// NAT gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NatGateway {
    pub nat_gateway_id: String,
    pub state: Option<String>,
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
}

/// Security group rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupRule {
    pub security_group_rule_id: String,
    pub group_id: Option<String>,
    #[serde(default)]
    pub is_egress: bool,
    pub ip_protocol: Option<String>,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub cidr_ipv4: Option<String>,
}

/// Route table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    pub route_table_id: String,
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl RouteTable {
    /// Whether the table has an active `0.0.0.0/0` route.
    #[must_use]
    pub fn has_default_route(&self) -> bool {
        self.routes.iter().any(|r| {
            r.destination_cidr_block.as_deref() == Some("0.0.0.0/0")
                && r.state.as_deref() != Some("blackhole")
        })
    }
}

/// Route entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    pub destination_cidr_block: Option<String>,
    pub gateway_id: Option<String>,
    pub nat_gateway_id: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeNatGatewaysOutput {
    #[serde(default)]
    pub nat_gateways: Vec<NatGateway>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeSecurityGroupRulesOutput {
    #[serde(default)]
    pub security_group_rules: Vec<SecurityGroupRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeRouteTablesOutput {
    #[serde(default)]
    pub route_tables: Vec<RouteTable>,
}
