//! Configuration module for the TTL probe.
//!
//! This module contains the execution identity and the timing/retry settings.

pub mod identity;
pub mod probe;

pub use identity::{ExecutionIdentity, IdentityError, METRIC_NAMESPACE, SERVICE_TYPE};
pub use probe::{ProbeSettings, MAX_RETRY_ATTEMPTS};
