//! AWS (Amazon Web Services) cloud accessor.
//!
//! Implements the [`CloudAccessor`](super::CloudAccessor) trait for AWS.
//!
//! ## Services
//!
//! - **EKS** - `describe-cluster`, `list-nodegroups`, `describe-nodegroup`,
//!   `list-addons`, `describe-addon`
//! - **IAM** - `get-role`
//! - **CloudWatch** - `get-metric-statistics`
//! - **EC2** - `describe-nat-gateways`, `describe-security-group-rules`,
//!   `describe-route-tables`

mod client;
pub mod models;

pub use client::AwsCli;
pub use models::*;
