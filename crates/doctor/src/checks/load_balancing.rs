//! LoadBalancer services and ingresses.

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

use super::{qualified_name, Check, CheckContext, CheckOutcome, Contribution};
use crate::error::CheckError;
use crate::model::{Category, IngressState, IngressStatus, LoadBalancerStatus};

pub struct LoadBalancingCheck;

#[async_trait]
impl Check for LoadBalancingCheck {
    fn category(&self) -> Category {
        Category::LoadBalancing
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let namespace = ctx.config.namespace();
        let services = ctx.cluster.list_services(namespace).await?;
        let ingresses = ctx.cluster.list_ingresses(namespace).await?;

        let pending_services = services
            .iter()
            .filter(|svc| is_pending_load_balancer(svc))
            .map(|svc| qualified_name(&svc.metadata))
            .collect();

        let known: BTreeSet<String> = services
            .iter()
            .map(|svc| qualified_name(&svc.metadata))
            .collect();
        let ingresses = ingresses
            .iter()
            .map(|ing| ingress_status(ing, &known))
            .collect();

        Ok(Contribution::LoadBalancing(LoadBalancerStatus {
            pending_services,
            ingresses,
        })
        .into())
    }
}

fn is_pending_load_balancer(svc: &Service) -> bool {
    let is_lb = svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer");
    let provisioned = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|points| !points.is_empty());
    is_lb && !provisioned
}

/// Service names an ingress routes to.
fn backend_services(ing: &Ingress) -> BTreeSet<String> {
    let Some(spec) = ing.spec.as_ref() else {
        return BTreeSet::new();
    };
    let default = spec
        .default_backend
        .iter()
        .filter_map(|b| b.service.as_ref().map(|s| s.name.clone()));
    let routed = spec
        .rules
        .iter()
        .flatten()
        .filter_map(|rule| rule.http.as_ref())
        .flat_map(|http| &http.paths)
        .filter_map(|path| path.backend.service.as_ref().map(|s| s.name.clone()));
    default.chain(routed).collect()
}

fn ingress_status(ing: &Ingress, known_services: &BTreeSet<String>) -> IngressStatus {
    let namespace = ing.metadata.namespace.clone().unwrap_or_default();
    let has_address = ing
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|points| !points.is_empty());

    let mut problems = Vec::new();
    if !has_address {
        problems.push("no load balancer address assigned".to_string());
    }
    for backend in backend_services(ing) {
        if !known_services.contains(&format!("{namespace}/{backend}")) {
            problems.push(format!("backend service {backend} not found"));
        }
    }

    IngressStatus {
        name: ing.metadata.name.clone().unwrap_or_default(),
        namespace,
        state: if has_address {
            IngressState::Ready
        } else {
            IngressState::Pending
        },
        problems,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::fixture::{obj, FixtureCluster};
    use crate::checks::testing::context;

    fn service(namespace: &str, name: &str, type_: &str, ingress: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"type": type_},
            "status": {"loadBalancer": {"ingress": ingress}}
        })
    }

    #[tokio::test]
    async fn test_pending_services_and_ingress_states() {
        let mut cluster = FixtureCluster::new();
        cluster.services = vec![
            obj(service("web", "frontend", "LoadBalancer", serde_json::json!([]))),
            obj(service("web", "api", "LoadBalancer", serde_json::json!([{"hostname": "a.elb.amazonaws.com"}]))),
            obj(service("web", "internal", "ClusterIP", serde_json::json!([]))),
        ];
        cluster.ingresses = vec![
            obj(serde_json::json!({
                "metadata": {"name": "shop", "namespace": "web"},
                "spec": {"rules": [{"http": {"paths": [
                    {"path": "/", "pathType": "Prefix", "backend": {"service": {"name": "api", "port": {"number": 80}}}},
                    {"path": "/cart", "pathType": "Prefix", "backend": {"service": {"name": "cart", "port": {"number": 80}}}}
                ]}}]},
                "status": {"loadBalancer": {"ingress": [{"hostname": "b.elb.amazonaws.com"}]}}
            })),
            obj(serde_json::json!({
                "metadata": {"name": "admin", "namespace": "web"},
                "spec": {"defaultBackend": {"service": {"name": "api", "port": {"number": 80}}}},
                "status": {"loadBalancer": {}}
            })),
        ];

        let outcome = LoadBalancingCheck.run(&context(cluster)).await.unwrap();
        let Contribution::LoadBalancing(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        assert_eq!(status.pending_services, vec!["web/frontend".to_string()]);
        assert_eq!(status.ingresses[0].state, IngressState::Ready);
        assert_eq!(
            status.ingresses[0].problems,
            vec!["backend service cart not found".to_string()]
        );
        assert_eq!(status.ingresses[1].state, IngressState::Pending);
        assert_eq!(
            status.ingresses[1].problems,
            vec!["no load balancer address assigned".to_string()]
        );
    }

    #[tokio::test]
    async fn test_no_services_is_empty_evidence() {
        let outcome = LoadBalancingCheck
            .run(&context(FixtureCluster::new()))
            .await
            .unwrap();
        assert_eq!(
            outcome.contribution,
            Contribution::LoadBalancing(LoadBalancerStatus::default())
        );
    }
}
