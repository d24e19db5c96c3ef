//! Health command - read-only diagnostic report for one EKS cluster.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use doctor_cloud::{aws::AwsCli, CloudAccessor};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::accessor::KubeAccessor;
use crate::aggregator::run_checks;
use crate::checks::{default_checks, CheckContext};
use crate::config::{parse_duration, HealthConfig, Settings};
use crate::model::{parse_categories, Category};
use crate::report::{render, synthesize};

/// Run every health check against a cluster and print the report.
#[derive(Args, Debug)]
pub struct HealthCommand {
    /// EKS cluster name.
    cluster: String,

    /// Restrict workload-scoped checks to one namespace.
    #[arg(short, long)]
    namespace: Option<String>,

    /// Categories to skip (comma-separated tags, e.g. `networking,security`).
    #[arg(long)]
    exclude: Option<String>,

    /// Only show these categories in the report.
    #[arg(long)]
    only: Option<String>,

    /// Overall time budget, e.g. `30s`, `5m`, `1h30m`.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    timeout: Duration,

    /// AWS region of the cluster.
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// AWS CLI profile.
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Kubeconfig context to use instead of the current one.
    #[arg(long)]
    context: Option<String>,

    /// Skip every AWS API query.
    #[arg(long, default_value = "false")]
    no_cloud: bool,

    /// Settings file (YAML). Falls back to `$EKS_DOCTOR_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output report as JSON.
    #[arg(long, default_value = "false")]
    json: bool,
}

impl HealthCommand {
    /// Build the invocation config, run the checks and print the report.
    ///
    /// Fails only when the configuration is invalid or the API server cannot
    /// be reached; findings never make this return an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let settings =
            Settings::resolve(self.config.as_deref()).context("Failed to load settings")?;
        let excluded = self.categories(self.exclude.as_deref())?;
        let only = self
            .only
            .as_deref()
            .map(parse_categories)
            .transpose()
            .context("Invalid --only")?;

        let mut config = HealthConfig::new(&self.cluster)
            .with_settings(settings)
            .with_namespace(self.namespace.clone())
            .excluding(excluded)
            .with_timeout(self.timeout);
        config.region.clone_from(&self.region);
        config.profile.clone_from(&self.profile);

        info!(
            cluster = %self.cluster,
            namespace = self.namespace.as_deref().unwrap_or("*"),
            timeout_secs = self.timeout.as_secs(),
            "Starting health run"
        );

        let client = self.client().await?;
        let cloud = self.cloud(&config);
        let ctx = CheckContext::new(Arc::new(KubeAccessor::new(client)), cloud, Arc::new(config))
            .with_cancel(cancel);

        let run = run_checks(&ctx, default_checks()).await;
        let report = synthesize(&self.cluster, &run);

        if self.json {
            let report = match &only {
                Some(only) => report.filtered(only),
                None => report,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            render::print(&report, only.as_ref());
        }
        Ok(())
    }

    fn categories(&self, list: Option<&str>) -> Result<BTreeSet<Category>> {
        match list {
            Some(list) => parse_categories(list).context("Invalid --exclude"),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn client(&self) -> Result<Client> {
        let config = match &self.context {
            Some(context) => Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.clone()),
                ..KubeConfigOptions::default()
            })
            .await
            .with_context(|| format!("Failed to load kubeconfig context {context}"))?,
            None => Config::infer()
                .await
                .context("Failed to load cluster configuration")?,
        };
        connect(config).await
    }

    fn cloud(&self, config: &HealthConfig) -> Option<Arc<dyn CloudAccessor>> {
        if self.no_cloud {
            info!("Cloud queries disabled");
            return None;
        }
        let Some(region) = config.region.as_deref() else {
            warn!("No AWS region configured; skipping cloud queries (set --region or AWS_REGION)");
            return None;
        };
        let mut aws = AwsCli::new(region);
        if let Some(profile) = config.profile.as_deref() {
            aws = aws.with_profile(profile);
        }
        Some(Arc::new(aws))
    }
}

/// Build a client and confirm the API server answers before any check runs.
async fn connect(config: Config) -> Result<Client> {
    let url = config.cluster_url.clone();
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    let version = client
        .apiserver_version()
        .await
        .with_context(|| format!("Cannot reach the Kubernetes API server at {url}"))?;
    info!(server = %url, version = %version.git_version, "Connected to cluster");
    Ok(client)
}
