//! Snapshot data model.
//!
//! One [`ClusterHealthStatus`] is built per invocation. Each check owns one
//! category field; nothing downstream of the aggregator mutates it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// Categories
// ============================================================================

/// One diagnostic concern; each has exactly one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[serde(rename = "versions")]
    Versions,
    #[serde(rename = "apis")]
    DeprecatedApis,
    Logging,
    Networking,
    #[serde(rename = "lb")]
    LoadBalancing,
    Scheduling,
    Auth,
    Nodes,
    Storage,
    Security,
}

impl Category {
    /// Every category, in report order.
    pub const ALL: [Category; 10] = [
        Category::Versions,
        Category::DeprecatedApis,
        Category::Logging,
        Category::Networking,
        Category::LoadBalancing,
        Category::Scheduling,
        Category::Auth,
        Category::Nodes,
        Category::Storage,
        Category::Security,
    ];

    /// Short tag accepted on the command line.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Versions => "versions",
            Self::DeprecatedApis => "apis",
            Self::Logging => "logging",
            Self::Networking => "networking",
            Self::LoadBalancing => "lb",
            Self::Scheduling => "scheduling",
            Self::Auth => "auth",
            Self::Nodes => "nodes",
            Self::Storage => "storage",
            Self::Security => "security",
        }
    }

    /// Section heading.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Versions => "Version Skew",
            Self::DeprecatedApis => "Deprecated APIs",
            Self::Logging => "Logging & Monitoring",
            Self::Networking => "Networking",
            Self::LoadBalancing => "Load Balancers",
            Self::Scheduling => "Scheduling & Resources",
            Self::Auth => "Authentication",
            Self::Nodes => "Node Readiness",
            Self::Storage => "Storage",
            Self::Security => "Security",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_ascii_lowercase().as_str() {
            "versions" | "version" | "control-plane" => Self::Versions,
            "apis" | "deprecated" => Self::DeprecatedApis,
            "logging" | "monitoring" => Self::Logging,
            "networking" | "network" | "core" => Self::Networking,
            "lb" | "loadbalancers" | "load-balancers" => Self::LoadBalancing,
            "scheduling" | "workloads" | "resources" => Self::Scheduling,
            "auth" | "security-auth" | "irsa" => Self::Auth,
            "nodes" | "node" => Self::Nodes,
            "storage" => Self::Storage,
            "security" => Self::Security,
            _ => return Err(ConfigError::UnknownCategory(s.trim().to_string())),
        };
        Ok(category)
    }
}

/// Parse a comma-separated category list. Empty entries are ignored.
pub fn parse_categories(list: &str) -> Result<BTreeSet<Category>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

// ============================================================================
// Snapshot
// ============================================================================

/// Kubelet version to the names of nodes running it.
pub type NodeVersions = BTreeMap<String, BTreeSet<String>>;

/// The complete snapshot for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterHealthStatus {
    pub node_versions: NodeVersions,
    pub deprecated_apis: Vec<String>,
    pub control_plane: ControlPlaneStatus,
    pub logging: LoggingStatus,
    pub networking: NetworkingStatus,
    pub load_balancers: LoadBalancerStatus,
    pub scheduling: SchedulingStatus,
    pub auth: AuthStatus,
    pub nodes: NodeStatus,
    pub storage: StorageStatus,
    pub security: SecurityStatus,
}

impl ClusterHealthStatus {
    /// More than one kubelet version in the fleet.
    #[must_use]
    pub fn has_version_skew(&self) -> bool {
        self.node_versions.len() > 1
    }
}

/// Control plane details from the cloud provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlPlaneStatus {
    pub version: Option<String>,
    /// Nodes whose kubelet minor version is behind the control plane.
    pub lagging_nodes: Vec<String>,
    pub addon_issues: Vec<String>,
    pub throttling: Option<ThrottlingSummary>,
}

/// API server throttling over the sampled window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThrottlingSummary {
    pub total_requests: f64,
    pub throttled_requests: f64,
    pub peak_throttle_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoggingStatus {
    pub log_shipper: Vec<PodStatus>,
    pub metrics_forwarder: Vec<PodStatus>,
    pub metrics_server: Vec<PodStatus>,
}

impl LoggingStatus {
    /// Agent display names paired with their pods.
    #[must_use]
    pub fn agents(&self) -> [(&'static str, &[PodStatus]); 3] {
        [
            ("Fluent Bit", self.log_shipper.as_slice()),
            ("CloudWatch agent", self.metrics_forwarder.as_slice()),
            ("Metrics server", self.metrics_server.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkingStatus {
    pub cni_pods: Vec<PodStatus>,
    pub dns_pods: Vec<PodStatus>,
    pub external_access: bool,
    pub dns_resolution: bool,
    pub egress_issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadBalancerStatus {
    /// `namespace/name` of LoadBalancer services without an address.
    pub pending_services: Vec<String>,
    pub ingresses: Vec<IngressStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngressState {
    Pending,
    Ready,
}

impl fmt::Display for IngressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngressStatus {
    pub name: String,
    pub namespace: String,
    pub state: IngressState,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulingStatus {
    pub pending_pods: Vec<PendingPod>,
    pub resource_issues: Vec<ResourceIssue>,
    /// Controllers that are not fully ready.
    pub workloads: Vec<WorkloadStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadKind {
    StatefulSet,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatefulSet => write!(f, "StatefulSet"),
            Self::DaemonSet => write!(f, "DaemonSet"),
        }
    }
}

/// Replica readiness of a StatefulSet or DaemonSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub ready: i32,
    pub desired: i32,
    /// DaemonSet pods that should be running but are not.
    pub unavailable: i32,
}

impl WorkloadStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self.kind {
            WorkloadKind::StatefulSet => self.ready >= self.desired,
            WorkloadKind::DaemonSet => self.unavailable == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPod {
    pub pod: String,
    pub namespace: String,
    pub reason: String,
}

/// Requested vs allocatable resources on one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceIssue {
    pub node_name: String,
    /// Millicores.
    pub cpu: ResourceStats,
    /// Bytes.
    pub memory: ResourceStats,
    /// Either resource is above the configured utilization threshold.
    pub under_pressure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceStats {
    pub capacity: u64,
    pub allocated: u64,
    pub utilization_percent: f64,
}

impl ResourceStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(capacity: u64, allocated: u64) -> Self {
        let utilization_percent = if capacity == 0 {
            0.0
        } else {
            allocated as f64 / capacity as f64 * 100.0
        };
        Self {
            capacity,
            allocated,
            utilization_percent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthStatus {
    pub irsa_issues: Vec<String>,
    pub rbac_issues: Vec<String>,
    pub iam_auth_issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStatus {
    pub not_ready: Vec<String>,
    pub asg_issues: Vec<String>,
    pub bootstrap_issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStatus {
    pub pvcs: Vec<PvcStatus>,
    pub storage_classes: Vec<StorageClassInfo>,
    pub csi_controllers: Vec<PodStatus>,
}

impl StorageStatus {
    /// Claims not in the `Bound` phase.
    pub fn unbound(&self) -> impl Iterator<Item = &PvcStatus> {
        self.pvcs.iter().filter(|p| p.phase != "Bound")
    }

    #[must_use]
    pub fn has_default_class(&self) -> bool {
        self.storage_classes.iter().any(|c| c.is_default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PvcStatus {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageClassInfo {
    pub name: String,
    pub provisioner: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SecurityStatus {
    pub network_policy_count: usize,
    pub checks: Vec<SecurityCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl SecurityCheck {
    pub fn new(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message: message.into(),
        }
    }
}

/// Point-in-time view of one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodStatus {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub node_name: Option<String>,
    pub message: Option<String>,
}

impl PodStatus {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

impl From<&Pod> for PodStatus {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            phase: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            message: status.and_then(|s| s.message.clone().or_else(|| s.reason.clone())),
        }
    }
}

// ============================================================================
// Run results
// ============================================================================

/// Whether a failure cost the whole category or just a live probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureScope {
    /// The category could not be evaluated; its contribution was discarded.
    Check,
    /// A probe or cloud lookup degraded; the rest of the contribution was kept.
    Probe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub category: Category,
    pub scope: FailureScope,
    pub cause: String,
}

/// Output of the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthRun {
    pub status: ClusterHealthStatus,
    pub failures: Vec<CheckFailure>,
    /// Categories whose contribution made it into the snapshot.
    pub evaluated: Vec<Category>,
    /// Categories excluded from this run.
    pub skipped: Vec<Category>,
}

impl HealthRun {
    /// The category-level failure for `category`, if it could not be evaluated.
    #[must_use]
    pub fn check_failure(&self, category: Category) -> Option<&CheckFailure> {
        self.failures
            .iter()
            .find(|f| f.category == category && f.scope == FailureScope::Check)
    }

    #[must_use]
    pub fn is_evaluated(&self, category: Category) -> bool {
        self.evaluated.contains(&category)
    }
}
