//! kube-rs backed accessor.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Event, Node, PersistentVolumeClaim, Pod, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ClusterAccessor, PodQuery};
use crate::error::AccessorError;

/// Accessor over a live API server.
#[derive(Clone)]
pub struct KubeAccessor {
    client: Client,
}

impl KubeAccessor {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn list<K>(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>, AccessorError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        debug!(kind = %K::kind(&()), namespace = namespace.unwrap_or("*"), "Listing resources");
        Ok(self.api::<K>(namespace).list(params).await?.items)
    }
}

fn is_terminal(pod: Option<&Pod>) -> bool {
    pod.and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed")
}

#[async_trait]
impl ClusterAccessor for KubeAccessor {
    async fn list_nodes(&self) -> Result<Vec<Node>, AccessorError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, AccessorError> {
        self.list(query.namespace.as_deref(), &query.list_params())
            .await
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Deployment>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_stateful_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<StatefulSet>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_daemon_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DaemonSet>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_ingresses(&self, namespace: Option<&str>) -> Result<Vec<Ingress>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_network_policies(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<NetworkPolicy>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_service_accounts(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceAccount>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_persistent_volume_claims(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<PersistentVolumeClaim>, AccessorError> {
        self.list(namespace, &ListParams::default()).await
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>, AccessorError> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_warning_events(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Event>, AccessorError> {
        self.list(namespace, &ListParams::default().fields("type=Warning"))
            .await
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: i64,
    ) -> Result<String, AccessorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        Ok(api.logs(name, &params).await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, AccessorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AccessorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(name, &DeleteParams::background().grace_period(0))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_pod_terminal(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<String, AccessorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = await_condition(api, name, is_terminal)
            .await
            .map_err(|e| AccessorError::Unavailable(e.to_string()))?;

        pod.as_ref()
            .and_then(|p| p.status.as_ref())
            .and_then(|s| s.phase.clone())
            .ok_or_else(|| AccessorError::NotFound(format!("pod {namespace}/{name}")))
    }
}
