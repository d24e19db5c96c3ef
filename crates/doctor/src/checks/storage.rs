//! Persistent volume claims, storage classes and CSI controllers.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;

use super::{Check, CheckContext, CheckOutcome, Contribution};
use crate::accessor::PodQuery;
use crate::error::CheckError;
use crate::model::{Category, PodStatus, PvcStatus, StorageClassInfo, StorageStatus};

const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
const CSI_CONTROLLERS: &[&str] = &["efs-csi-controller", "ebs-csi-controller"];

pub struct StorageCheck;

#[async_trait]
impl Check for StorageCheck {
    fn category(&self) -> Category {
        Category::Storage
    }

    async fn run(&self, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let pvcs = ctx
            .cluster
            .list_persistent_volume_claims(ctx.config.namespace())
            .await?;
        let classes = ctx.cluster.list_storage_classes().await?;

        let mut csi_controllers = Vec::new();
        for app in CSI_CONTROLLERS {
            let query = PodQuery::in_namespace(Some("kube-system")).label("app", app);
            let pods = ctx.cluster.list_pods(&query).await?;
            csi_controllers.extend(pods.iter().map(PodStatus::from));
        }

        Ok(Contribution::Storage(StorageStatus {
            pvcs: pvcs.iter().map(pvc_status).collect(),
            storage_classes: classes.iter().map(class_info).collect(),
            csi_controllers,
        })
        .into())
    }
}

fn pvc_status(pvc: &PersistentVolumeClaim) -> PvcStatus {
    PvcStatus {
        name: pvc.metadata.name.clone().unwrap_or_default(),
        namespace: pvc.metadata.namespace.clone().unwrap_or_default(),
        phase: pvc
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        storage_class: pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
    }
}

fn class_info(class: &StorageClass) -> StorageClassInfo {
    let is_default = class
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
        .is_some_and(|v| v == "true");
    StorageClassInfo {
        name: class.metadata.name.clone().unwrap_or_default(),
        provisioner: class.provisioner.clone(),
        is_default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::fixture::{obj, FixtureCluster};
    use crate::checks::testing::{context, pod};

    #[tokio::test]
    async fn test_storage_inventory() {
        let mut cluster = FixtureCluster::new();
        cluster.pvcs = vec![
            obj(serde_json::json!({
                "metadata": {"name": "data", "namespace": "db"},
                "spec": {"storageClassName": "gp3"},
                "status": {"phase": "Bound"}
            })),
            obj(serde_json::json!({
                "metadata": {"name": "scratch", "namespace": "db"},
                "spec": {},
                "status": {"phase": "Pending"}
            })),
        ];
        cluster.storage_classes = vec![obj(serde_json::json!({
            "metadata": {
                "name": "gp3",
                "annotations": {"storageclass.kubernetes.io/is-default-class": "true"}
            },
            "provisioner": "ebs.csi.aws.com"
        }))];
        cluster.pods = vec![
            obj(pod("kube-system", "ebs-csi-controller-0", serde_json::json!({"app": "ebs-csi-controller"}), "Running")),
            obj(pod("kube-system", "efs-csi-controller-0", serde_json::json!({"app": "efs-csi-controller"}), "Pending")),
        ];

        let outcome = StorageCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Storage(status) = outcome.contribution else {
            panic!("wrong contribution");
        };

        let unbound: Vec<&str> = status.unbound().map(|p| p.name.as_str()).collect();
        assert_eq!(unbound, vec!["scratch"]);
        assert!(status.has_default_class());
        assert_eq!(status.storage_classes[0].provisioner, "ebs.csi.aws.com");
        assert_eq!(status.csi_controllers.len(), 2);
        assert_eq!(status.csi_controllers[0].name, "efs-csi-controller-0");
        assert!(!status.csi_controllers[0].is_running());
    }

    #[tokio::test]
    async fn test_class_without_annotation_is_not_default() {
        let mut cluster = FixtureCluster::new();
        cluster.storage_classes = vec![obj(serde_json::json!({
            "metadata": {"name": "efs"},
            "provisioner": "efs.csi.aws.com"
        }))];

        let outcome = StorageCheck.run(&context(cluster)).await.unwrap();
        let Contribution::Storage(status) = outcome.contribution else {
            panic!("wrong contribution");
        };
        assert!(!status.has_default_class());
    }
}
