//! Disposable probe pods.
//!
//! A [`ProbeWorkload`] owns one pod from creation until deletion. Normal
//! paths call [`release`](ProbeWorkload::release); if the guard is dropped
//! instead (cancellation, panic, a `?` in between) the deletion runs as a
//! task on the context's janitor tracker, which the aggregator waits on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use serde_json::json;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::CheckContext;
use crate::accessor::ClusterAccessor;
use crate::config::Settings;
use crate::error::CheckError;

/// What a probe pod exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// In-cluster name resolution.
    Dns,
    /// Outbound HTTPS to the configured URL.
    Reachability,
}

impl ProbeKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Reachability => "reachability",
        }
    }

    fn command(self, settings: &Settings) -> Vec<String> {
        match self {
            Self::Dns => vec!["nslookup".to_string(), settings.dns_probe_target.clone()],
            Self::Reachability => vec![
                "wget".to_string(),
                "-q".to_string(),
                "-T".to_string(),
                "10".to_string(),
                "-O".to_string(),
                "/dev/null".to_string(),
                settings.reachability_probe_url.clone(),
            ],
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the probe pod. Runs as nobody with every capability dropped.
pub fn manifest(name: &str, kind: ProbeKind, settings: &Settings) -> Result<Pod, CheckError> {
    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": settings.probe_namespace,
            "labels": {
                "app.kubernetes.io/managed-by": "eks-doctor",
                "eks-doctor/probe": kind.name()
            }
        },
        "spec": {
            "restartPolicy": "Never",
            "activeDeadlineSeconds": settings.probe_timeout_secs,
            "automountServiceAccountToken": false,
            "containers": [{
                "name": "probe",
                "image": settings.probe_image,
                "command": kind.command(settings),
                "resources": {
                    "limits": {"memory": "32Mi", "cpu": "50m"},
                    "requests": {"memory": "16Mi", "cpu": "10m"}
                },
                "securityContext": {
                    "allowPrivilegeEscalation": false,
                    "capabilities": {"drop": ["ALL"]}
                }
            }],
            "securityContext": {
                "runAsNonRoot": true,
                "runAsUser": 65534,
                "seccompProfile": {"type": "RuntimeDefault"}
            }
        }
    });
    serde_json::from_value(pod).map_err(|e| CheckError::ProbeSetup(e.to_string()))
}

/// Guard for one live probe pod.
pub struct ProbeWorkload {
    cluster: Arc<dyn ClusterAccessor>,
    janitor: TaskTracker,
    namespace: String,
    name: String,
    kind: ProbeKind,
    armed: bool,
}

impl ProbeWorkload {
    /// Create the probe pod. Fails if the pod cannot be created.
    pub async fn launch(ctx: &CheckContext, kind: ProbeKind) -> Result<Self, CheckError> {
        let settings = &ctx.config.settings;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("eks-doctor-{}-{}", kind.name(), &suffix[..8]);
        let pod = manifest(&name, kind, settings)?;

        ctx.cluster
            .create_pod(&settings.probe_namespace, &pod)
            .await?;
        info!(probe = %kind, pod = %name, "Probe pod created");

        Ok(Self {
            cluster: Arc::clone(&ctx.cluster),
            janitor: ctx.janitor.clone(),
            namespace: settings.probe_namespace.clone(),
            name,
            kind,
            armed: true,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the pod to finish. `Ok(true)` means it succeeded.
    pub async fn await_terminal(&self, timeout: Duration) -> Result<bool, CheckError> {
        let wait = self
            .cluster
            .wait_for_pod_terminal(&self.namespace, &self.name);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(phase)) => {
                debug!(probe = %self.kind, phase = %phase, "Probe finished");
                Ok(phase == "Succeeded")
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(probe = %self.kind, pod = %self.name, "Probe timed out");
                Err(CheckError::ProbeTimeout {
                    probe: self.kind.name().to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Delete the pod now.
    pub async fn release(mut self) {
        self.armed = false;
        delete(self.cluster.as_ref(), &self.namespace, &self.name).await;
    }
}

impl Drop for ProbeWorkload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let cluster = Arc::clone(&self.cluster);
        let namespace = self.namespace.clone();
        let name = self.name.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(pod = %name, "Scheduling probe cleanup");
                self.janitor.spawn_on(
                    async move { delete(cluster.as_ref(), &namespace, &name).await },
                    &handle,
                );
            }
            Err(_) => warn!(pod = %name, namespace = %namespace, "No runtime to delete probe pod"),
        }
    }
}

async fn delete(cluster: &dyn ClusterAccessor, namespace: &str, name: &str) {
    match cluster.delete_pod(namespace, name).await {
        Ok(()) => debug!(pod = %name, "Probe pod deleted"),
        Err(e) => warn!(pod = %name, namespace = %namespace, error = %e, "Failed to delete probe pod"),
    }
}
