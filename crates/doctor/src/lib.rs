//! EKS Doctor.
//!
//! Read-only health diagnostics for Amazon EKS clusters. Independent checks
//! observe the cluster (and optionally the AWS control plane), the
//! aggregator assembles one [`ClusterHealthStatus`] snapshot, and the
//! synthesizer turns it into a prioritized [`HealthReport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use eks_doctor::{checks, run_checks, synthesize, CheckContext, HealthConfig, KubeAccessor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = kube::Client::try_default().await?;
//!     let config = Arc::new(HealthConfig::new("prod"));
//!     let ctx = CheckContext::new(Arc::new(KubeAccessor::new(client)), None, config);
//!     let run = run_checks(&ctx, checks::default_checks()).await;
//!     let report = synthesize("prod", &run);
//!     println!("{} issues", report.total_count);
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod accessor;
pub mod aggregator;
pub mod checks;
pub mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod quantity;
pub mod report;

pub use accessor::{ClusterAccessor, KubeAccessor};
pub use aggregator::run_checks;
pub use checks::{Check, CheckContext};
pub use config::{HealthConfig, Settings};
pub use error::{AccessorError, CheckError, ConfigError};
pub use model::{Category, ClusterHealthStatus, HealthRun};
pub use report::{synthesize, HealthReport};
