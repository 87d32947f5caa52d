//! Execution identity.
//!
//! The chart request and the emitted samples are addressed by the account,
//! region and service the probe runs as. The identity is resolved from the
//! runtime environment instead of being hardcoded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace the latency metric is emitted under.
pub const METRIC_NAMESPACE: &str = "aws-embedded-metrics";

/// Service type dimension of the emitted metric.
pub const SERVICE_TYPE: &str = "AWS::Lambda::Function";

/// Errors raised while resolving an identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The ARN does not have the `arn:partition:service:region:account:resource` shape.
    #[error("Invalid ARN '{0}'")]
    InvalidArn(String),

    /// A component of the identity is empty.
    #[error("Identity field '{0}' cannot be empty")]
    EmptyField(&'static str),
}

/// Who and where the probe runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionIdentity {
    /// Account identifier.
    pub account_id: String,
    /// Region name.
    pub region: String,
    /// Name of the running service (used as the metric's log group and service name).
    pub service_name: String,
}

impl ExecutionIdentity {
    /// Creates an identity from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if any part is empty.
    pub fn new(
        account_id: impl Into<String>,
        region: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            account_id: account_id.into(),
            region: region.into(),
            service_name: service_name.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Resolves the identity from the ARN the service was invoked under.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::ExecutionIdentity;
    ///
    /// let identity = ExecutionIdentity::from_arn(
    ///     "arn:aws:lambda:us-east-1:750010179392:function:StreamProcessor",
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(identity.account_id, "750010179392");
    /// assert_eq!(identity.region, "us-east-1");
    /// assert_eq!(identity.service_name, "StreamProcessor");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the ARN is malformed.
    pub fn from_arn(arn: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::InvalidArn(arn.to_string());

        let mut parts = arn.splitn(6, ':');
        if parts.next() != Some("arn") {
            return Err(invalid());
        }
        let _partition = parts.next().ok_or_else(invalid)?;
        let _service = parts.next().ok_or_else(invalid)?;
        let region = parts.next().ok_or_else(invalid)?;
        let account_id = parts.next().ok_or_else(invalid)?;
        let resource = parts.next().ok_or_else(invalid)?;

        // "function:<name>[:<qualifier>]" or "<type>/<name>"
        let service_name = match resource.split_once(':') {
            Some((_, rest)) => rest.split(':').next().unwrap_or(rest),
            None => resource.rsplit('/').next().unwrap_or(resource),
        };

        Self::new(account_id, region, service_name).map_err(|_| invalid())
    }

    /// Validates that no component is empty.
    ///
    /// # Errors
    ///
    /// Returns the first empty field.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.account_id.trim().is_empty() {
            return Err(IdentityError::EmptyField("account_id"));
        }
        if self.region.trim().is_empty() {
            return Err(IdentityError::EmptyField("region"));
        }
        if self.service_name.trim().is_empty() {
            return Err(IdentityError::EmptyField("service_name"));
        }
        Ok(())
    }

    /// Dimensions that address this service's latency series.
    #[must_use]
    pub fn metric_dimensions(&self) -> [(&'static str, String); 3] {
        [
            ("LogGroup", self.service_name.clone()),
            ("ServiceName", self.service_name.clone()),
            ("ServiceType", SERVICE_TYPE.to_string()),
        ]
    }
}

impl Default for ExecutionIdentity {
    /// Identity used when running locally without any environment.
    fn default() -> Self {
        Self {
            account_id: "000000000000".to_string(),
            region: "local".to_string(),
            service_name: "ttl-probe".to_string(),
        }
    }
}
