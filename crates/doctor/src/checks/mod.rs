//! Health checks.
//!
//! Each check covers one [`Category`], reads what it needs through the
//! accessors in [`CheckContext`], and returns its [`Contribution`] for the
//! snapshot. Checks never see each other's results.

mod auth;
mod deprecated;
mod load_balancing;
mod logging;
mod networking;
mod nodes;
pub mod probe;
mod scheduling;
mod security;
mod storage;
mod version;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doctor_cloud::CloudAccessor;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use auth::AuthCheck;
pub use deprecated::DeprecatedApiCheck;
pub use load_balancing::LoadBalancingCheck;
pub use logging::LoggingAgentsCheck;
pub use networking::NetworkingCheck;
pub use nodes::NodeReadinessCheck;
pub use scheduling::SchedulingCheck;
pub use security::SecurityPostureCheck;
pub use storage::StorageCheck;
pub use version::VersionSkewCheck;

use crate::accessor::ClusterAccessor;
use crate::config::HealthConfig;
use crate::error::CheckError;
use crate::model::{
    AuthStatus, Category, ClusterHealthStatus, ControlPlaneStatus, LoadBalancerStatus,
    LoggingStatus, NetworkingStatus, NodeStatus, NodeVersions, SchedulingStatus, SecurityStatus,
    StorageStatus,
};

/// Shared inputs for one invocation.
#[derive(Clone)]
pub struct CheckContext {
    pub cluster: Arc<dyn ClusterAccessor>,
    /// Absent when cloud queries are disabled; cloud sub-steps are skipped.
    pub cloud: Option<Arc<dyn CloudAccessor>>,
    pub config: Arc<HealthConfig>,
    pub cancel: CancellationToken,
    /// End of the overall run budget. Probes stop waiting here and report
    /// a degraded result instead of being cancelled.
    pub deadline: Option<Instant>,
    /// Tracks probe pod cleanups spawned from `Drop`.
    pub janitor: TaskTracker,
}

impl CheckContext {
    pub fn new(
        cluster: Arc<dyn ClusterAccessor>,
        cloud: Option<Arc<dyn CloudAccessor>>,
        config: Arc<HealthConfig>,
    ) -> Self {
        Self {
            cluster,
            cloud,
            config,
            cancel: CancellationToken::new(),
            deadline: None,
            janitor: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// How long a probe may still wait: the probe timeout, capped by
    /// what is left of the run deadline.
    #[must_use]
    pub fn wait_budget(&self) -> Duration {
        let timeout = self.config.probe_timeout();
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }
}

/// One category's share of the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    Versions {
        node_versions: NodeVersions,
        control_plane: ControlPlaneStatus,
    },
    DeprecatedApis(Vec<String>),
    Logging(LoggingStatus),
    Networking(NetworkingStatus),
    LoadBalancing(LoadBalancerStatus),
    Scheduling(SchedulingStatus),
    Auth(AuthStatus),
    Nodes(NodeStatus),
    Storage(StorageStatus),
    Security(SecurityStatus),
}

impl Contribution {
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Versions { .. } => Category::Versions,
            Self::DeprecatedApis(_) => Category::DeprecatedApis,
            Self::Logging(_) => Category::Logging,
            Self::Networking(_) => Category::Networking,
            Self::LoadBalancing(_) => Category::LoadBalancing,
            Self::Scheduling(_) => Category::Scheduling,
            Self::Auth(_) => Category::Auth,
            Self::Nodes(_) => Category::Nodes,
            Self::Storage(_) => Category::Storage,
            Self::Security(_) => Category::Security,
        }
    }

    /// Write into the category's field. Existing entries are kept.
    pub fn merge_into(self, status: &mut ClusterHealthStatus) {
        match self {
            Self::Versions {
                node_versions,
                control_plane,
            } => {
                for (version, nodes) in node_versions {
                    status.node_versions.entry(version).or_default().extend(nodes);
                }
                status.control_plane = control_plane;
            }
            Self::DeprecatedApis(findings) => status.deprecated_apis.extend(findings),
            Self::Logging(logging) => status.logging = logging,
            Self::Networking(networking) => status.networking = networking,
            Self::LoadBalancing(lb) => status.load_balancers = lb,
            Self::Scheduling(scheduling) => status.scheduling = scheduling,
            Self::Auth(auth) => status.auth = auth,
            Self::Nodes(nodes) => status.nodes = nodes,
            Self::Storage(storage) => status.storage = storage,
            Self::Security(security) => status.security = security,
        }
    }
}

/// A check's result: its contribution plus non-fatal degradations.
#[derive(Debug)]
pub struct CheckOutcome {
    pub contribution: Contribution,
    pub degraded: Vec<CheckError>,
}

impl From<Contribution> for CheckOutcome {
    fn from(contribution: Contribution) -> Self {
        Self {
            contribution,
            degraded: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Check: Send + Sync {
    fn category(&self) -> Category;

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError>;
}

/// The full check set, one per category.
#[must_use]
pub fn default_checks() -> Vec<Arc<dyn Check>> {
    vec![
        Arc::new(VersionSkewCheck),
        Arc::new(DeprecatedApiCheck),
        Arc::new(LoggingAgentsCheck),
        Arc::new(NetworkingCheck),
        Arc::new(LoadBalancingCheck),
        Arc::new(SchedulingCheck),
        Arc::new(AuthCheck),
        Arc::new(NodeReadinessCheck),
        Arc::new(StorageCheck),
        Arc::new(SecurityPostureCheck),
    ]
}

/// `namespace/name` of an object.
pub(crate) fn qualified_name(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}
