//! CNI, cluster DNS, live probes and VPC egress.

use std::sync::Arc;

use async_trait::async_trait;
use doctor_cloud::CloudAccessor;
use tracing::{debug, warn};

use super::probe::{ProbeKind, ProbeWorkload};
use super::{Check, CheckContext, CheckOutcome, Contribution};
use crate::accessor::PodQuery;
use crate::error::CheckError;
use crate::model::{Category, NetworkingStatus, PodStatus};

const SYSTEM_NAMESPACE: &str = "kube-system";

pub struct NetworkingCheck;

#[async_trait]
impl Check for NetworkingCheck {
    fn category(&self) -> Category {
        Category::Networking
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let system = PodQuery::in_namespace(Some(SYSTEM_NAMESPACE));
        let cni_pods = ctx
            .cluster
            .list_pods(&system.clone().label("k8s-app", "aws-node"))
            .await?;
        let dns_pods = ctx
            .cluster
            .list_pods(&system.label("k8s-app", "kube-dns"))
            .await?;

        let mut degraded = Vec::new();
        let dns_resolution = run_probe(ctx, ProbeKind::Dns, &mut degraded).await?;
        let external_access = run_probe(ctx, ProbeKind::Reachability, &mut degraded).await?;

        let egress_issues = match &ctx.cloud {
            Some(cloud) => match egress_issues(cloud, &ctx.config.cluster_name).await {
                Ok(issues) => issues,
                Err(e) => {
                    warn!(error = %e, "VPC egress review unavailable");
                    degraded.push(e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let status = NetworkingStatus {
            cni_pods: cni_pods.iter().map(PodStatus::from).collect(),
            dns_pods: dns_pods.iter().map(PodStatus::from).collect(),
            external_access,
            dns_resolution,
            egress_issues,
        };
        Ok(CheckOutcome {
            contribution: Contribution::Networking(status),
            degraded,
        })
    }
}

/// Launch, observe and delete one probe. A timeout counts as a failed probe,
/// and so does a probe the run deadline leaves no time for.
async fn run_probe(
    ctx: &CheckContext,
    kind: ProbeKind,
    degraded: &mut Vec<CheckError>,
) -> Result<bool, CheckError> {
    let budget = ctx.wait_budget();
    if budget.is_zero() {
        warn!(probe = %kind, "Run deadline reached, probe not started");
        degraded.push(CheckError::ProbeSkipped {
            probe: kind.name().to_string(),
        });
        return Ok(false);
    }

    let probe = ProbeWorkload::launch(ctx, kind).await?;
    let result = probe.await_terminal(budget).await;
    probe.release().await;

    match result {
        Ok(passed) => Ok(passed),
        Err(err @ CheckError::ProbeTimeout { .. }) => {
            degraded.push(err);
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

async fn egress_issues(
    cloud: &Arc<dyn CloudAccessor>,
    cluster: &str,
) -> Result<Vec<String>, CheckError> {
    let described = cloud.describe_cluster(cluster).await?;
    let Some(vpc) = described.resources_vpc_config else {
        warn!(cluster = %cluster, "Cluster has no VPC configuration");
        return Ok(vec!["Cluster VPC configuration is missing".to_string()]);
    };
    let mut issues = Vec::new();

    if let Some(vpc_id) = vpc.vpc_id.as_deref() {
        let gateways = cloud.nat_gateways(vpc_id).await?;
        if !gateways
            .iter()
            .any(|g| g.state.as_deref() == Some("available"))
        {
            issues.push(format!("No available NAT gateway in VPC {vpc_id}"));
        }

        for table in cloud.route_tables(vpc_id).await? {
            if !table.has_default_route() {
                issues.push(format!(
                    "Route table {} has no default route",
                    table.route_table_id
                ));
            }
        }
    }

    if let Some(group) = vpc.cluster_security_group_id.as_deref() {
        let rules = cloud.security_group_rules(group).await?;
        if !rules.iter().any(|r| r.is_egress) {
            issues.push(format!("Cluster security group {group} has no egress rules"));
        }
    }

    debug!(cluster = %cluster, issues = issues.len(), "Egress evaluated");
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::fixture::{obj, FixtureCluster};
    use crate::checks::testing::{context_with_cloud, pod, shared_context};
    use doctor_cloud::aws::{EksCluster, NatGateway, Route, RouteTable, SecurityGroupRule, VpcConfig};
    use doctor_cloud::MockCloudAccessor;

    fn system_pods() -> FixtureCluster {
        let mut cluster = FixtureCluster::new();
        cluster.pods = vec![
            obj(pod("kube-system", "aws-node-1", serde_json::json!({"k8s-app": "aws-node"}), "Running")),
            obj(pod("kube-system", "coredns-1", serde_json::json!({"k8s-app": "kube-dns"}), "Running")),
            obj(pod("kube-system", "coredns-2", serde_json::json!({"k8s-app": "kube-dns"}), "Pending")),
        ];
        cluster
    }

    #[tokio::test]
    async fn test_probes_succeed_and_pods_are_deleted() {
        let cluster = Arc::new(system_pods());
        let outcome = NetworkingCheck.run(&shared_context(&cluster)).await.unwrap();
        let Contribution::Networking(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        assert_eq!(status.cni_pods.len(), 1);
        assert_eq!(status.dns_pods.len(), 2);
        assert!(status.dns_resolution);
        assert!(status.external_access);
        assert!(outcome.degraded.is_empty());

        let mut created = cluster.created_pods();
        let mut deleted = cluster.deleted_pods();
        created.sort();
        deleted.sort();
        assert_eq!(created.len(), 2);
        assert_eq!(created, deleted);
    }

    #[tokio::test]
    async fn test_failed_probes_are_false_and_deleted() {
        let cluster = Arc::new(system_pods().probe_phase(Some("Failed")));
        let outcome = NetworkingCheck.run(&shared_context(&cluster)).await.unwrap();
        let Contribution::Networking(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        assert!(!status.dns_resolution);
        assert!(!status.external_access);
        assert!(outcome.degraded.is_empty());
        assert_eq!(cluster.deleted_pods().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_degrades_and_deletes() {
        let cluster = Arc::new(system_pods().probe_phase(None));
        let outcome = NetworkingCheck.run(&shared_context(&cluster)).await.unwrap();
        let Contribution::Networking(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        assert!(!status.dns_resolution);
        assert!(!status.external_access);
        assert_eq!(status.cni_pods.len(), 1);
        assert_eq!(outcome.degraded.len(), 2);
        assert!(outcome
            .degraded
            .iter()
            .all(|e| matches!(e, CheckError::ProbeTimeout { .. })));
        assert_eq!(cluster.deleted_pods().len(), 2);
    }

    #[tokio::test]
    async fn test_cni_listing_denied_fails_check() {
        let cluster = Arc::new(system_pods().deny_label("k8s-app", "aws-node"));
        let err = NetworkingCheck
            .run(&shared_context(&cluster))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::AccessorUnavailable { .. }));
        assert!(cluster.created_pods().is_empty());
    }

    #[tokio::test]
    async fn test_probe_creation_denied_fails_check() {
        let cluster = Arc::new(system_pods().deny("create_pod"));
        let err = NetworkingCheck
            .run(&shared_context(&cluster))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::AccessorUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_egress_issues_from_vpc() {
        let mut cloud = MockCloudAccessor::new();
        cloud.expect_describe_cluster().returning(|name| {
            Ok(EksCluster {
                name: name.to_string(),
                resources_vpc_config: Some(VpcConfig {
                    vpc_id: Some("vpc-1".to_string()),
                    cluster_security_group_id: Some("sg-1".to_string()),
                    ..VpcConfig::default()
                }),
                ..EksCluster::default()
            })
        });
        cloud.expect_nat_gateways().returning(|_| {
            Ok(vec![NatGateway {
                nat_gateway_id: "nat-1".to_string(),
                state: Some("deleted".to_string()),
                ..NatGateway::default()
            }])
        });
        cloud.expect_route_tables().returning(|_| {
            Ok(vec![
                RouteTable {
                    route_table_id: "rtb-private".to_string(),
                    routes: vec![Route {
                        destination_cidr_block: Some("10.0.0.0/16".to_string()),
                        gateway_id: Some("local".to_string()),
                        ..Route::default()
                    }],
                    ..RouteTable::default()
                },
                RouteTable {
                    route_table_id: "rtb-public".to_string(),
                    routes: vec![Route {
                        destination_cidr_block: Some("0.0.0.0/0".to_string()),
                        gateway_id: Some("igw-1".to_string()),
                        state: Some("active".to_string()),
                        ..Route::default()
                    }],
                    ..RouteTable::default()
                },
            ])
        });
        cloud.expect_security_group_rules().returning(|_| {
            Ok(vec![SecurityGroupRule {
                security_group_rule_id: "sgr-1".to_string(),
                is_egress: false,
                ..SecurityGroupRule::default()
            }])
        });

        let ctx = context_with_cloud(system_pods(), cloud);
        let outcome = NetworkingCheck.run(&ctx).await.unwrap();
        let Contribution::Networking(status) = outcome.contribution else {
            panic!("wrong contribution");
        };
        assert_eq!(
            status.egress_issues,
            vec![
                "No available NAT gateway in VPC vpc-1".to_string(),
                "Route table rtb-private has no default route".to_string(),
                "Cluster security group sg-1 has no egress rules".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_denied_vpc_lookup_keeps_cluster_results() {
        let mut cloud = MockCloudAccessor::new();
        cloud.expect_describe_cluster().returning(|_| {
            Err(doctor_cloud::CloudError::AccessDenied(
                "eks:DescribeCluster".to_string(),
            ))
        });

        let ctx = context_with_cloud(system_pods(), cloud);
        let outcome = NetworkingCheck.run(&ctx).await.unwrap();
        let Contribution::Networking(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        assert_eq!(status.cni_pods.len(), 1);
        assert!(status.dns_resolution);
        assert!(status.egress_issues.is_empty());
        assert_eq!(outcome.degraded.len(), 1);
        assert!(matches!(
            outcome.degraded[0],
            CheckError::CloudUnavailable { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_caps_dns_wait() {
        let cluster = Arc::new(system_pods().probe_phase(None));
        let ctx = shared_context(&cluster)
            .with_deadline(tokio::time::Instant::now() + std::time::Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let outcome = NetworkingCheck.run(&ctx).await.unwrap();
        let Contribution::Networking(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        assert!(started.elapsed() >= std::time::Duration::from_secs(5));
        assert!(started.elapsed() < std::time::Duration::from_secs(6));
        assert!(!status.dns_resolution);
        assert!(!status.external_access);
        assert_eq!(status.dns_pods.len(), 2);
        assert!(matches!(
            outcome.degraded.as_slice(),
            [
                CheckError::ProbeTimeout { secs: 5, .. },
                CheckError::ProbeSkipped { .. }
            ]
        ));
        assert_eq!(cluster.created_pods().len(), 1);
        assert_eq!(cluster.deleted_pods(), cluster.created_pods());
    }
}
