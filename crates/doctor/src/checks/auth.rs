//! IRSA wiring, RBAC denials and IAM trust policies.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use doctor_cloud::aws::IamRole;
use doctor_cloud::{CloudAccessor, CloudError};
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use regex::Regex;
use tracing::{debug, warn};

use super::{qualified_name, Check, CheckContext, CheckOutcome, Contribution};
use crate::accessor::PodQuery;
use crate::error::CheckError;
use crate::model::{AuthStatus, Category};

const ROLE_ANNOTATION: &str = "eks.amazonaws.com/role-arn";
const WEB_IDENTITY_ACTION: &str = "sts:AssumeRoleWithWebIdentity";
const EKS_SERVICE_PRINCIPAL: &str = "eks.amazonaws.com";

static ROLE_ARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:iam::\d{12}:role/[\w+=,.@/-]+$").expect("valid regex")
});

pub struct AuthCheck;

/// A service account annotated with an IAM role.
struct IrsaBinding {
    namespace: String,
    service_account: String,
    role_arn: String,
}

#[async_trait]
impl Check for AuthCheck {
    fn category(&self) -> Category {
        Category::Auth
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let namespace = ctx.config.namespace();
        let settings = &ctx.config.settings;
        let mut status = AuthStatus::default();

        let accounts = ctx.cluster.list_service_accounts(namespace).await?;
        let mut bindings = Vec::new();
        for account in &accounts {
            let Some(binding) = irsa_binding(account) else {
                continue;
            };
            if !ROLE_ARN_RE.is_match(&binding.role_arn) {
                status.irsa_issues.push(format!(
                    "Service account {} has malformed role ARN {}",
                    qualified_name(&account.metadata),
                    binding.role_arn
                ));
                continue;
            }
            bindings.push(binding);
        }

        for binding in &bindings {
            let query = PodQuery::in_namespace(Some(binding.namespace.as_str()))
                .service_account(&binding.service_account);
            for pod in ctx.cluster.list_pods(&query).await? {
                let pod_name = qualified_name(&pod.metadata);

                if sets_role_env(&pod) && !has_web_identity_token(&pod) {
                    status.irsa_issues.push(format!(
                        "Pod {pod_name} using SA {} has AWS_ROLE_ARN but no projected web identity token",
                        binding.service_account
                    ));
                }

                if !is_running(&pod) {
                    continue;
                }
                let name = pod.metadata.name.as_deref().unwrap_or_default();
                let logs = match ctx
                    .cluster
                    .pod_logs(&binding.namespace, name, settings.log_tail_lines)
                    .await
                {
                    Ok(logs) => logs,
                    Err(e) => {
                        debug!(pod = %pod_name, error = %e, "Skipping pod logs");
                        continue;
                    }
                };
                if settings
                    .auth_denied_patterns
                    .iter()
                    .any(|pattern| logs.contains(pattern.as_str()))
                {
                    status.irsa_issues.push(format!(
                        "Pod {pod_name} using SA {} with role {} has AWS access issues",
                        binding.service_account, binding.role_arn
                    ));
                }
            }
        }

        let mut seen = BTreeSet::new();
        for event in ctx.cluster.list_warning_events(namespace).await? {
            let Some(message) = event.message.as_deref() else {
                continue;
            };
            if !message.to_ascii_lowercase().contains("forbidden") {
                continue;
            }
            let object = &event.involved_object;
            let issue = format!(
                "{}/{}: {message}",
                object.namespace.as_deref().unwrap_or_default(),
                object.name.as_deref().unwrap_or_default()
            );
            if seen.insert(issue.clone()) {
                status.rbac_issues.push(issue);
            }
        }

        let mut degraded = Vec::new();
        if let Some(cloud) = &ctx.cloud {
            status.iam_auth_issues =
                iam_issues(cloud, &ctx.config.cluster_name, &bindings, &mut degraded).await;
        }

        Ok(CheckOutcome {
            contribution: Contribution::Auth(status),
            degraded,
        })
    }
}

fn irsa_binding(account: &ServiceAccount) -> Option<IrsaBinding> {
    let role_arn = account
        .metadata
        .annotations
        .as_ref()?
        .get(ROLE_ANNOTATION)?
        .trim()
        .to_string();
    Some(IrsaBinding {
        namespace: account.metadata.namespace.clone().unwrap_or_default(),
        service_account: account.metadata.name.clone().unwrap_or_default(),
        role_arn,
    })
}

fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

fn sets_role_env(pod: &Pod) -> bool {
    pod.spec.as_ref().is_some_and(|spec| {
        spec.containers
            .iter()
            .filter_map(|c| c.env.as_ref())
            .flatten()
            .any(|var| var.name == "AWS_ROLE_ARN")
    })
}

/// A projected volume sourcing a service account token.
fn has_web_identity_token(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|volume| volume.projected.as_ref())
        .filter_map(|projected| projected.sources.as_ref())
        .flatten()
        .any(|source| source.service_account_token.is_some())
}

/// Role name from an ARN; IAM paths are dropped.
fn role_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// Trust policy problems. Lookups that fail are recorded in `degraded`; without
/// the cluster description no role can be judged.
async fn iam_issues(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
    bindings: &[IrsaBinding],
    degraded: &mut Vec<CheckError>,
) -> Vec<String> {
    let mut issues = Vec::new();
    let described = match cloud.describe_cluster(cluster).await {
        Ok(described) => described,
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "IAM review unavailable");
            degraded.push(e.into());
            return issues;
        }
    };
    let issuer = described
        .oidc_issuer()
        .map(|url| url.trim_start_matches("https://").to_string());

    let roles: BTreeSet<&str> = bindings.iter().map(|b| b.role_arn.as_str()).collect();
    for arn in roles {
        let Some(role) = fetch_role(cloud, arn, &mut issues, degraded).await else {
            continue;
        };
        if !trusts_web_identity(&role, issuer.as_deref()) {
            warn!(role = %arn, "Role does not trust the cluster OIDC provider");
            issues.push(format!(
                "IAM role {} does not trust the cluster OIDC provider for {WEB_IDENTITY_ACTION}",
                role.role_name
            ));
        }
    }

    if let Some(arn) = described.role_arn.as_deref() {
        if let Some(role) = fetch_role(cloud, arn, &mut issues, degraded).await {
            let trusted = statements(&role).any(|s| {
                s.allows("sts:AssumeRole")
                    && s.principals("Service").contains(&EKS_SERVICE_PRINCIPAL)
            });
            if !trusted {
                issues.push(format!(
                    "Cluster role {} does not allow {EKS_SERVICE_PRINCIPAL} to assume it",
                    role.role_name
                ));
            }
        }
    }

    issues
}

/// `None` when the role is missing (an issue) or unreadable (a degradation).
async fn fetch_role(
    cloud: &Arc<dyn CloudAccessor>,
    arn: &str,
    issues: &mut Vec<String>,
    degraded: &mut Vec<CheckError>,
) -> Option<IamRole> {
    match cloud.get_role(role_name(arn)).await {
        Ok(role) => Some(role),
        Err(CloudError::NotFound(_)) => {
            issues.push(format!("IAM role {arn} does not exist"));
            None
        }
        Err(e) => {
            warn!(role = %arn, error = %e, "IAM role unavailable");
            degraded.push(e.into());
            None
        }
    }
}

fn statements(role: &IamRole) -> impl Iterator<Item = &doctor_cloud::aws::PolicyStatement> {
    role.assume_role_policy_document
        .iter()
        .flat_map(|doc| doc.statement.iter())
}

fn trusts_web_identity(role: &IamRole, issuer: Option<&str>) -> bool {
    statements(role).any(|s| {
        s.allows(WEB_IDENTITY_ACTION)
            && s.principals("Federated").iter().any(|principal| {
                principal.contains(":oidc-provider/")
                    && issuer.map_or(true, |issuer| principal.ends_with(issuer))
            })
    })
}
