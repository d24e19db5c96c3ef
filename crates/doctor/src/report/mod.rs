//! Health report: findings, severity classification and recommendations.

pub mod render;
mod synthesis;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Category, CheckFailure, ClusterHealthStatus, FailureScope};

pub use synthesis::synthesize;

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// What a finding is about. Drives severity, counting and recommendations.
///
/// The first seven variants are counted towards `total_count` and carry the
/// numbered recommendations, in this order. The rest are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    VersionSkew,
    DeprecatedApi,
    IrsaIssue,
    RbacIssue,
    NodeNotReady,
    PendingPod,
    PendingLoadBalancer,

    IamAuthIssue,
    AgentUnhealthy,
    AgentMissing,
    DnsResolutionFailed,
    ExternalAccessFailed,
    NetworkPodUnhealthy,
    EgressIssue,
    IngressPending,
    NoNetworkPolicies,
    SecurityCheckFailed,
    AsgIssue,
    BootstrapIssue,
    StorageIssue,
    ResourcePressure,
    WorkloadNotReady,
    ControlPlaneLag,
    AddonIssue,
    ApiThrottling,
}

impl FindingKind {
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::VersionSkew | Self::NodeNotReady | Self::DnsResolutionFailed => {
                Severity::Critical
            }
            Self::AgentMissing
            | Self::NoNetworkPolicies
            | Self::ControlPlaneLag
            | Self::ApiThrottling => Severity::Info,
            _ => Severity::Warning,
        }
    }

    /// Counted towards `total_count`.
    #[must_use]
    pub fn is_counted(self) -> bool {
        matches!(
            self,
            Self::VersionSkew
                | Self::DeprecatedApi
                | Self::IrsaIssue
                | Self::RbacIssue
                | Self::NodeNotReady
                | Self::PendingPod
                | Self::PendingLoadBalancer
        )
    }

    /// Counted towards `critical_count`.
    #[must_use]
    pub fn is_counted_critical(self) -> bool {
        self == Self::VersionSkew
    }

    #[must_use]
    pub fn recommendation(self) -> &'static str {
        match self {
            Self::VersionSkew => "Upgrade nodes to match the control plane version",
            Self::DeprecatedApi => "Update applications using deprecated APIs",
            Self::IrsaIssue => "Fix IRSA configuration issues",
            Self::RbacIssue => "Review and fix RBAC issues",
            Self::NodeNotReady => "Investigate nodes in NotReady state",
            Self::PendingPod => "Address pod scheduling issues",
            Self::PendingLoadBalancer => "Check LoadBalancer provisioning issues",
            Self::IamAuthIssue => "Fix IAM role trust policies",
            Self::AgentUnhealthy => "Restore unhealthy logging and monitoring agents",
            Self::AgentMissing => "Install missing logging and monitoring agents",
            Self::DnsResolutionFailed => "Investigate CoreDNS and in-cluster name resolution",
            Self::ExternalAccessFailed | Self::EgressIssue => {
                "Check outbound connectivity (NAT gateways, routes, security groups)"
            }
            Self::NetworkPodUnhealthy => "Investigate VPC CNI and CoreDNS pods",
            Self::IngressPending => "Check Ingress controller and backend services",
            Self::NoNetworkPolicies => "Consider adding NetworkPolicies to restrict pod traffic",
            Self::SecurityCheckFailed => "Review failed security posture checks",
            Self::AsgIssue => "Review node group scaling configuration and health",
            Self::BootstrapIssue => "Inspect kubelet and bootstrap logs on NotReady nodes",
            Self::StorageIssue => "Resolve storage provisioning issues",
            Self::ResourcePressure => "Rebalance workloads or add capacity to nodes under pressure",
            Self::WorkloadNotReady => {
                "Investigate StatefulSets and DaemonSets that are not fully ready"
            }
            Self::ControlPlaneLag => "Plan node upgrades to the control plane minor version",
            Self::AddonIssue => "Repair degraded EKS add-ons",
            Self::ApiThrottling => "Reduce API server request volume from noisy clients",
        }
    }
}

/// One classified observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    pub fn new(category: Category, kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: kind.severity(),
            kind,
            message: message.into(),
        }
    }
}

/// How a report section should be presented.
#[derive(Debug, PartialEq, Eq)]
pub enum SectionState<'a> {
    Skipped,
    NotEvaluated(&'a str),
    Clean,
    Issues(Vec<&'a Finding>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub cluster: String,
    pub generated_at: DateTime<Utc>,
    pub critical_count: usize,
    pub total_count: usize,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub failures: Vec<CheckFailure>,
    pub skipped: Vec<Category>,
    pub status: ClusterHealthStatus,
}

impl HealthReport {
    pub fn findings_for(&self, category: Category) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }

    /// Degradations (probes, cloud lookups) recorded for `category`.
    pub fn degraded_probes(&self, category: Category) -> impl Iterator<Item = &CheckFailure> {
        self.failures
            .iter()
            .filter(move |f| f.category == category && f.scope == FailureScope::Probe)
    }

    #[must_use]
    pub fn section(&self, category: Category) -> SectionState<'_> {
        if self.skipped.contains(&category) {
            return SectionState::Skipped;
        }
        if let Some(failure) = self
            .failures
            .iter()
            .find(|f| f.category == category && f.scope == FailureScope::Check)
        {
            return SectionState::NotEvaluated(&failure.cause);
        }
        let findings: Vec<&Finding> = self.findings_for(category).collect();
        if findings.is_empty() {
            SectionState::Clean
        } else {
            SectionState::Issues(findings)
        }
    }

    /// Restrict the report to `only`. Counts and recommendations are
    /// recomputed from the remaining findings.
    #[must_use]
    pub fn filtered(&self, only: &BTreeSet<Category>) -> Self {
        let findings: Vec<Finding> = self
            .findings
            .iter()
            .filter(|f| only.contains(&f.category))
            .cloned()
            .collect();
        let (critical_count, total_count, recommendations) = synthesis::summarize(&findings);
        Self {
            cluster: self.cluster.clone(),
            generated_at: self.generated_at,
            critical_count,
            total_count,
            findings,
            recommendations,
            failures: self
                .failures
                .iter()
                .filter(|f| only.contains(&f.category))
                .cloned()
                .collect(),
            skipped: self
                .skipped
                .iter()
                .copied()
                .filter(|c| only.contains(c))
                .collect(),
            status: self.status.clone(),
        }
    }
}
