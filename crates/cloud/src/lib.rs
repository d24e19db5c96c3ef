//! Cloud provider accessors for eks-doctor.
//!
//! Everything in this crate is read-only. The cluster doctor only ever
//! describes, lists and queries:
//!
//! - **EKS** - cluster, node group and add-on metadata
//! - **IAM** - role trust policy documents
//! - **CloudWatch** - control plane metric series
//! - **EC2** - NAT gateways, security group rules, route tables
//!
//! The [`CloudAccessor`] trait is the seam the health checks depend on;
//! [`aws::AwsCli`] implements it on top of the `aws` command line tool so the
//! user's existing profiles, SSO sessions and credential chain apply as-is.

pub mod providers;

pub use providers::{
    aws, CloudAccessor, CloudError, MetricPoint, MetricQuery, Statistic,
};

#[cfg(any(test, feature = "mock"))]
pub use providers::MockCloudAccessor;
