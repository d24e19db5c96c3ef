//! Invocation configuration.
//!
//! [`HealthConfig`] is built once from the command line and shared by `Arc`
//! with every check. [`Settings`] holds the tunables that can also come from
//! a YAML file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::Category;

/// Environment variable naming a settings file when `--config` is absent.
pub const CONFIG_ENV: &str = "EKS_DOCTOR_CONFIG";

/// Default overall timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").expect("valid regex"));

/// Tunables for probes and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Image for DNS and reachability probe pods.
    pub probe_image: String,
    /// Namespace probe pods are created in.
    pub probe_namespace: String,
    /// Name the DNS probe resolves.
    pub dns_probe_target: String,
    /// URL the reachability probe fetches.
    pub reachability_probe_url: String,
    /// Seconds a probe pod may take to reach a terminal phase.
    pub probe_timeout_secs: u64,
    /// Checks running at the same time.
    pub max_concurrent_checks: usize,
    /// Node utilization (percent) above which a node is under pressure.
    pub utilization_warn_percent: f64,
    /// Log substrings that indicate an authorization failure.
    pub auth_denied_patterns: Vec<String>,
    /// Log lines fetched per pod for the IRSA log scan.
    pub log_tail_lines: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_image: "busybox:1.36".to_string(),
            probe_namespace: "default".to_string(),
            dns_probe_target: "kubernetes.default.svc.cluster.local".to_string(),
            reachability_probe_url: "https://aws.amazon.com".to_string(),
            probe_timeout_secs: 60,
            max_concurrent_checks: 4,
            utilization_warn_percent: 80.0,
            auth_denied_patterns: vec![
                "AccessDenied".to_string(),
                "UnauthorizedOperation".to_string(),
                "is not authorized to perform".to_string(),
            ],
            log_tail_lines: 100,
        }
    }
}

impl Settings {
    /// Parse and validate settings from YAML. Missing fields take defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded settings file");
        Self::from_yaml(&yaml)
    }

    /// Load from `path`, else from `$EKS_DOCTOR_CONFIG`, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_checks",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.utilization_warn_percent > 0.0 && self.utilization_warn_percent <= 100.0) {
            return Err(ConfigError::Invalid {
                field: "utilization_warn_percent",
                reason: format!("{} is outside (0, 100]", self.utilization_warn_percent),
            });
        }
        if self.log_tail_lines <= 0 {
            return Err(ConfigError::Invalid {
                field: "log_tail_lines",
                reason: "must be positive".to_string(),
            });
        }
        if self.probe_image.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "probe_image",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything one invocation needs; passed to every check.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub cluster_name: String,
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Restricts workload-scoped listings to one namespace.
    pub namespace: Option<String>,
    pub excluded: BTreeSet<Category>,
    /// Overall budget for the run.
    pub timeout: Duration,
    pub settings: Settings,
}

impl HealthConfig {
    #[must_use]
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            region: None,
            profile: None,
            namespace: None,
            excluded: BTreeSet::new(),
            timeout: DEFAULT_TIMEOUT,
            settings: Settings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    #[must_use]
    pub fn excluding(mut self, excluded: BTreeSet<Category>) -> Self {
        self.excluded = excluded;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn is_enabled(&self, category: Category) -> bool {
        !self.excluded.contains(&category)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.probe_timeout_secs)
    }
}

/// Parse `300`, `30s`, `5m` or `1h30m` into a non-zero duration.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let secs = if let Ok(secs) = value.parse::<u64>() {
        secs
    } else {
        let caps = DURATION_RE.captures(value).ok_or_else(invalid)?;
        let part = |i: usize| -> Result<u64, ConfigError> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<u64>().map_err(|_| invalid()))
        };
        part(1)? * 3600 + part(2)? * 60 + part(3)?
    };

    if secs == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings = Settings::from_yaml("probe_timeout_secs: 15\nprobe_namespace: ops\n").unwrap();
        assert_eq!(settings.probe_timeout_secs, 15);
        assert_eq!(settings.probe_namespace, "ops");
        assert_eq!(settings.max_concurrent_checks, 4);
        assert!((settings.utilization_warn_percent - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Settings::from_yaml("probe_timeout: 15\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        let err = Settings::from_yaml("max_concurrent_checks: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_concurrent_checks",
                ..
            }
        ));
        assert!(Settings::from_yaml("utilization_warn_percent: 150\n").is_err());
        assert!(Settings::from_yaml("probe_timeout_secs: 0\n").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5 minutes").is_err());
    }

    #[test]
    #[serial]
    fn test_resolve_from_env() {
        let path = std::env::temp_dir().join(format!("eks-doctor-{}.yaml", std::process::id()));
        std::fs::write(&path, "log_tail_lines: 20\n").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let settings = Settings::resolve(None).unwrap();
        std::env::remove_var(CONFIG_ENV);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.log_tail_lines, 20);
    }

    #[test]
    #[serial]
    fn test_resolve_defaults_without_env() {
        std::env::remove_var(CONFIG_ENV);
        assert_eq!(Settings::resolve(None).unwrap(), Settings::default());
    }

    #[test]
    #[serial]
    fn test_missing_file_is_read_error() {
        std::env::remove_var(CONFIG_ENV);
        let err = Settings::resolve(Some(Path::new("/nonexistent/eks-doctor.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
