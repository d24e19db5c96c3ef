//! Cluster-state accessor.
//!
//! Checks never talk to the API server directly; they go through
//! [`ClusterAccessor`], which [`KubeAccessor`] implements with kube-rs and
//! tests implement with an in-memory fixture.

mod client;

#[cfg(test)]
pub(crate) mod fixture;

pub use client::KubeAccessor;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Event, Node, PersistentVolumeClaim, Pod, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ListParams;

use crate::error::AccessorError;

/// Pod listing filter. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodQuery {
    pub namespace: Option<String>,
    pub label: Option<(String, String)>,
    pub phase: Option<String>,
    pub service_account: Option<String>,
}

impl PodQuery {
    /// Pods in every namespace.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn in_namespace(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.label = Some((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    #[must_use]
    pub fn service_account(mut self, name: &str) -> Self {
        self.service_account = Some(name.to_string());
        self
    }

    /// Label and field selectors for the API server.
    #[must_use]
    pub fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some((key, value)) = &self.label {
            params = params.labels(&format!("{key}={value}"));
        }

        let mut fields = Vec::new();
        if let Some(phase) = &self.phase {
            fields.push(format!("status.phase={phase}"));
        }
        if let Some(sa) = &self.service_account {
            fields.push(format!("spec.serviceAccountName={sa}"));
        }
        if !fields.is_empty() {
            params = params.fields(&fields.join(","));
        }
        params
    }

    /// Client-side equivalent of [`list_params`](Self::list_params).
    #[must_use]
    pub fn matches(&self, pod: &Pod) -> bool {
        let meta = &pod.metadata;
        let spec = pod.spec.as_ref();

        if let Some(ns) = &self.namespace {
            if meta.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        if let Some((key, value)) = &self.label {
            let found = meta.labels.as_ref().and_then(|l| l.get(key));
            if found != Some(value) {
                return false;
            }
        }
        if let Some(phase) = &self.phase {
            let actual = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            if actual != Some(phase.as_str()) {
                return false;
            }
        }
        if let Some(sa) = &self.service_account {
            let actual = spec.and_then(|s| s.service_account_name.as_deref());
            if actual.unwrap_or("default") != sa {
                return false;
            }
        }
        true
    }
}

/// Read-only cluster queries plus the probe pod lifecycle.
///
/// Namespace arguments of `None` mean all namespaces.
#[async_trait]
pub trait ClusterAccessor: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, AccessorError>;

    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, AccessorError>;

    async fn list_deployments(&self, namespace: Option<&str>)
        -> Result<Vec<Deployment>, AccessorError>;

    async fn list_stateful_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<StatefulSet>, AccessorError>;

    async fn list_daemon_sets(&self, namespace: Option<&str>)
        -> Result<Vec<DaemonSet>, AccessorError>;

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>, AccessorError>;

    async fn list_ingresses(&self, namespace: Option<&str>) -> Result<Vec<Ingress>, AccessorError>;

    async fn list_network_policies(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<NetworkPolicy>, AccessorError>;

    async fn list_service_accounts(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceAccount>, AccessorError>;

    async fn list_persistent_volume_claims(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<PersistentVolumeClaim>, AccessorError>;

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>, AccessorError>;

    /// Events of type `Warning`.
    async fn list_warning_events(&self, namespace: Option<&str>)
        -> Result<Vec<Event>, AccessorError>;

    /// Last `tail_lines` lines of a pod's logs.
    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: i64,
    ) -> Result<String, AccessorError>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, AccessorError>;

    /// Delete a pod immediately. Deleting a missing pod succeeds.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AccessorError>;

    /// Resolve once the pod is `Succeeded` or `Failed`, returning the phase.
    ///
    /// Does not time out on its own.
    async fn wait_for_pod_terminal(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<String, AccessorError>;
}
