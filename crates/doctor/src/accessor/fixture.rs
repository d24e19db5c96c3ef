//! In-memory cluster for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Event, Node, PersistentVolumeClaim, Pod, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::Resource;
use serde::de::DeserializeOwned;

use super::{ClusterAccessor, PodQuery};
use crate::error::AccessorError;

/// Every operation name accepted by [`FixtureCluster::deny`].
pub(crate) const ALL_OPERATIONS: &[&str] = &[
    "nodes",
    "pods",
    "deployments",
    "statefulsets",
    "daemonsets",
    "services",
    "ingresses",
    "networkpolicies",
    "serviceaccounts",
    "pvcs",
    "storageclasses",
    "events",
    "logs",
    "create_pod",
    "delete_pod",
    "wait_pod",
];

/// Build a Kubernetes object from JSON.
pub(crate) fn obj<K: DeserializeOwned>(value: serde_json::Value) -> K {
    serde_json::from_value(value).unwrap()
}

#[derive(Default)]
pub(crate) struct FixtureCluster {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub deployments: Vec<Deployment>,
    pub stateful_sets: Vec<StatefulSet>,
    pub daemon_sets: Vec<DaemonSet>,
    pub services: Vec<Service>,
    pub ingresses: Vec<Ingress>,
    pub network_policies: Vec<NetworkPolicy>,
    pub service_accounts: Vec<ServiceAccount>,
    pub pvcs: Vec<PersistentVolumeClaim>,
    pub storage_classes: Vec<StorageClass>,
    pub events: Vec<Event>,
    /// Keyed by `namespace/name`.
    pub logs: HashMap<String, String>,
    denied: HashSet<&'static str>,
    denied_labels: HashSet<(String, String)>,
    /// Phase probe pods end in; `None` never terminates.
    probe_phase: Option<String>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FixtureCluster {
    pub fn new() -> Self {
        Self {
            probe_phase: Some("Succeeded".to_string()),
            ..Self::default()
        }
    }

    /// Make one operation fail with `PermissionDenied`.
    pub fn deny(mut self, operation: &'static str) -> Self {
        self.denied.insert(operation);
        self
    }

    pub fn deny_everything(mut self) -> Self {
        self.denied.extend(ALL_OPERATIONS.iter().copied());
        self
    }

    /// Make pod listings with this label selector fail.
    pub fn deny_label(mut self, key: &str, value: &str) -> Self {
        self.denied_labels.insert((key.to_string(), value.to_string()));
        self
    }

    pub fn probe_phase(mut self, phase: Option<&str>) -> Self {
        self.probe_phase = phase.map(str::to_string);
        self
    }

    pub fn created_pods(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn guard(&self, operation: &'static str) -> Result<(), AccessorError> {
        if self.denied.contains(operation) {
            return Err(AccessorError::PermissionDenied(format!(
                "fixture denies {operation}"
            )));
        }
        Ok(())
    }
}

fn in_namespace<K: Resource + Clone>(items: &[K], namespace: Option<&str>) -> Vec<K> {
    items
        .iter()
        .filter(|item| namespace.is_none() || item.meta().namespace.as_deref() == namespace)
        .cloned()
        .collect()
}

#[async_trait]
impl ClusterAccessor for FixtureCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, AccessorError> {
        self.guard("nodes")?;
        Ok(self.nodes.clone())
    }

    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, AccessorError> {
        self.guard("pods")?;
        if let Some(label) = &query.label {
            if self.denied_labels.contains(label) {
                return Err(AccessorError::PermissionDenied(format!(
                    "fixture denies pods with {}={}",
                    label.0, label.1
                )));
            }
        }
        Ok(self.pods.iter().filter(|p| query.matches(p)).cloned().collect())
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Deployment>, AccessorError> {
        self.guard("deployments")?;
        Ok(in_namespace(&self.deployments, namespace))
    }

    async fn list_stateful_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<StatefulSet>, AccessorError> {
        self.guard("statefulsets")?;
        Ok(in_namespace(&self.stateful_sets, namespace))
    }

    async fn list_daemon_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DaemonSet>, AccessorError> {
        self.guard("daemonsets")?;
        Ok(in_namespace(&self.daemon_sets, namespace))
    }

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>, AccessorError> {
        self.guard("services")?;
        Ok(in_namespace(&self.services, namespace))
    }

    async fn list_ingresses(&self, namespace: Option<&str>) -> Result<Vec<Ingress>, AccessorError> {
        self.guard("ingresses")?;
        Ok(in_namespace(&self.ingresses, namespace))
    }

    async fn list_network_policies(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<NetworkPolicy>, AccessorError> {
        self.guard("networkpolicies")?;
        Ok(in_namespace(&self.network_policies, namespace))
    }

    async fn list_service_accounts(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceAccount>, AccessorError> {
        self.guard("serviceaccounts")?;
        Ok(in_namespace(&self.service_accounts, namespace))
    }

    async fn list_persistent_volume_claims(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<PersistentVolumeClaim>, AccessorError> {
        self.guard("pvcs")?;
        Ok(in_namespace(&self.pvcs, namespace))
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>, AccessorError> {
        self.guard("storageclasses")?;
        Ok(self.storage_classes.clone())
    }

    async fn list_warning_events(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Event>, AccessorError> {
        self.guard("events")?;
        Ok(in_namespace(&self.events, namespace)
            .into_iter()
            .filter(|e| e.type_.as_deref() == Some("Warning"))
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        _tail_lines: i64,
    ) -> Result<String, AccessorError> {
        self.guard("logs")?;
        self.logs
            .get(&format!("{namespace}/{name}"))
            .cloned()
            .ok_or_else(|| AccessorError::NotFound(format!("logs for {namespace}/{name}")))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, AccessorError> {
        self.guard("create_pod")?;
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.created
            .lock()
            .unwrap()
            .push(format!("{namespace}/{name}"));
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AccessorError> {
        self.guard("delete_pod")?;
        self.deleted
            .lock()
            .unwrap()
            .push(format!("{namespace}/{name}"));
        Ok(())
    }

    async fn wait_for_pod_terminal(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<String, AccessorError> {
        self.guard("wait_pod")?;
        match &self.probe_phase {
            Some(phase) => Ok(phase.clone()),
            None => std::future::pending().await,
        }
    }
}
