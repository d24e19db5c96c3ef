//! Deprecated API usage by workload controllers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{qualified_name, Check, CheckContext, CheckOutcome, Contribution};
use crate::error::CheckError;
use crate::model::Category;

/// Annotation key (or prefix) used to mark deprecated API usage.
const DEPRECATION_MARKER: &str = "deprecated.kubernetes.io";

const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Workload API groups removed from current Kubernetes releases.
const REMOVED_API_VERSIONS: &[&str] = &["extensions/v1beta1", "apps/v1beta1", "apps/v1beta2"];

pub struct DeprecatedApiCheck;

#[async_trait]
impl Check for DeprecatedApiCheck {
    fn category(&self) -> Category {
        Category::DeprecatedApis
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let namespace = ctx.config.namespace();
        let mut findings = Vec::new();

        for deployment in ctx.cluster.list_deployments(namespace).await? {
            findings.extend(inspect("Deployment", &deployment.metadata));
        }
        for stateful_set in ctx.cluster.list_stateful_sets(namespace).await? {
            findings.extend(inspect("StatefulSet", &stateful_set.metadata));
        }
        for daemon_set in ctx.cluster.list_daemon_sets(namespace).await? {
            findings.extend(inspect("DaemonSet", &daemon_set.metadata));
        }

        Ok(Contribution::DeprecatedApis(findings).into())
    }
}

fn inspect(kind: &str, meta: &ObjectMeta) -> Option<String> {
    let annotations = meta.annotations.as_ref()?;
    let name = qualified_name(meta);

    if annotations.keys().any(|k| k.starts_with(DEPRECATION_MARKER)) {
        return Some(format!("{kind} {name} uses deprecated APIs"));
    }
    removed_api_version(annotations)
        .map(|api| format!("{kind} {name} was applied with removed API {api}"))
}

fn removed_api_version(annotations: &BTreeMap<String, String>) -> Option<String> {
    let applied: serde_json::Value = serde_json::from_str(annotations.get(LAST_APPLIED)?).ok()?;
    let api = applied.get("apiVersion")?.as_str()?;
    REMOVED_API_VERSIONS
        .contains(&api)
        .then(|| api.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::fixture::{obj, FixtureCluster};
    use crate::checks::testing::context;

    fn deployment(namespace: &str, name: &str, annotations: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "metadata": {"name": name, "namespace": namespace, "annotations": annotations}
        })
    }

    #[tokio::test]
    async fn test_marker_and_last_applied() {
        let mut cluster = FixtureCluster::new();
        cluster.deployments = vec![
            obj(deployment("default", "web", serde_json::json!({"deprecated.kubernetes.io": "true"}))),
            obj(deployment("default", "api", serde_json::json!({}))),
        ];
        cluster.daemon_sets = vec![obj(deployment(
            "ops",
            "agent",
            serde_json::json!({
                LAST_APPLIED: r#"{"apiVersion":"extensions/v1beta1","kind":"DaemonSet"}"#
            }),
        ))];

        let outcome = DeprecatedApiCheck.run(&context(cluster)).await.unwrap();
        let Contribution::DeprecatedApis(findings) = outcome.contribution else {
            panic!("wrong contribution");
        };
        assert_eq!(
            findings,
            vec![
                "Deployment default/web uses deprecated APIs".to_string(),
                "DaemonSet ops/agent was applied with removed API extensions/v1beta1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_current_api_version_is_clean() {
        let mut cluster = FixtureCluster::new();
        cluster.stateful_sets = vec![obj(deployment(
            "db",
            "pg",
            serde_json::json!({LAST_APPLIED: r#"{"apiVersion":"apps/v1"}"#}),
        ))];
        let outcome = DeprecatedApiCheck.run(&context(cluster)).await.unwrap();
        assert_eq!(outcome.contribution, Contribution::DeprecatedApis(vec![]));
    }
}
