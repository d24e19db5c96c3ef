//! Error types for the health engine.

use std::path::PathBuf;

use doctor_cloud::CloudError;
use thiserror::Error;

/// Errors from the cluster-state accessor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessorError {
    /// The caller is not allowed to read or write the resource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The API server could not be reached.
    #[error("cluster API unavailable: {0}")]
    Unavailable(String),

    /// The resource (or resource type) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<kube::Error> for AccessorError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
                Self::PermissionDenied(resp.message.clone())
            }
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound(resp.message.clone()),
            kube::Error::Api(resp) => Self::Other(format!("{} ({})", resp.message, resp.code)),
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

/// Reasons a check could not produce (all of) its contribution.
#[derive(Error, Debug)]
pub enum CheckError {
    /// A cluster-state query failed.
    #[error("{source}")]
    AccessorUnavailable {
        #[from]
        source: AccessorError,
    },

    /// A cloud-provider query failed.
    #[error("cloud: {source}")]
    CloudUnavailable {
        #[from]
        source: CloudError,
    },

    /// A probe pod did not reach a terminal phase in time.
    #[error("{probe} probe did not finish within {secs}s")]
    ProbeTimeout { probe: String, secs: u64 },

    /// The run deadline passed before a probe could be started.
    #[error("{probe} probe not started: run deadline reached")]
    ProbeSkipped { probe: String },

    /// A resource lacked a field the check requires.
    #[error("malformed {resource}: {detail}")]
    MalformedResource { resource: String, detail: String },

    /// A probe pod could not be built or created.
    #[error("probe setup failed: {0}")]
    ProbeSetup(String),

    /// The invocation was cancelled or its timeout elapsed.
    #[error("cancelled before completion")]
    Cancelled,
}

/// Invalid configuration or arguments. These abort the run before any check.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown category `{0}`")]
    UnknownCategory(String),

    #[error("invalid duration `{0}` (expected e.g. 30s, 5m, 1h30m)")]
    InvalidDuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_forbidden_maps_to_permission_denied() {
        assert!(matches!(
            AccessorError::from(api_error(403)),
            AccessorError::PermissionDenied(_)
        ));
        assert!(matches!(
            AccessorError::from(api_error(401)),
            AccessorError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_missing_maps_to_not_found() {
        assert!(matches!(
            AccessorError::from(api_error(404)),
            AccessorError::NotFound(_)
        ));
        assert!(matches!(
            AccessorError::from(api_error(500)),
            AccessorError::Other(_)
        ));
    }
}
