//! Cloud accessor abstractions.
//!
//! This module defines the accessor trait and its supporting types.

pub mod aws;
mod traits;

pub use traits::{CloudAccessor, CloudError, MetricPoint, MetricQuery, Statistic};

#[cfg(any(test, feature = "mock"))]
pub use traits::MockCloudAccessor;

pub use aws::AwsCli;
