//! Metric sample model.
//!
//! Defines the `Metric` structure pushed to the metrics backend. A latency
//! sample is a single gauge value with a unit, a storage resolution and the
//! dimensions that address the series it belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use validator::Validate;

/// Unit attached to a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MetricUnit {
    /// Milliseconds.
    Milliseconds,
    /// No unit.
    #[default]
    None,
}

impl MetricUnit {
    /// Returns the unit name as understood by the metrics backend.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Milliseconds => "Milliseconds",
            Self::None => "None",
        }
    }
}

impl std::fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricUnit {
    type Err = MetricValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Milliseconds" => Ok(Self::Milliseconds),
            "None" | "" => Ok(Self::None),
            other => Err(MetricValidationError::UnknownUnit(other.to_string())),
        }
    }
}

/// Storage resolution of a metric sample.
///
/// Standard resolution samples are stored at one-minute granularity, high
/// resolution samples at one-second granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageResolution {
    /// 60 second resolution.
    #[default]
    Standard,
    /// 1 second resolution.
    High,
}

impl StorageResolution {
    /// Returns the resolution in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> u32 {
        match self {
            Self::Standard => 60,
            Self::High => 1,
        }
    }
}

/// A metric data point representing a single measurement.
///
/// # Example
///
/// ```
/// use shared::models::{Metric, MetricUnit};
///
/// let metric = Metric::gauge("ttl-latency", 5000.0)
///     .with_unit(MetricUnit::Milliseconds)
///     .with_label("ServiceName", "ttl-probe");
///
/// assert!(metric.validate_metric().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Metric {
    /// The name of the metric (e.g., "`ttl-latency`").
    #[validate(length(min = 1, message = "Metric name cannot be empty"))]
    pub name: String,

    /// The metric value.
    pub value: f64,

    /// Timestamp when the metric was recorded.
    pub timestamp: DateTime<Utc>,

    /// Labels (dimensions) for the metric.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Unit of the value.
    #[serde(default)]
    pub unit: MetricUnit,

    /// Storage resolution requested for the sample.
    #[serde(default)]
    pub resolution: StorageResolution,
}

/// Errors that can occur during metric validation.
#[derive(Debug, Error)]
pub enum MetricValidationError {
    /// The metric name is empty.
    #[error("Metric name cannot be empty")]
    EmptyName,

    /// Invalid label name.
    #[error("Invalid label name: '{0}'")]
    InvalidLabelName(String),

    /// The value is NaN or infinite.
    #[error("Metric value must be finite")]
    NonFiniteValue,

    /// The unit name is not recognized.
    #[error("Unknown metric unit: '{0}'")]
    UnknownUnit(String),

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Metric {
    /// Creates a gauge sample stamped with the current time.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            labels: HashMap::new(),
            unit: MetricUnit::None,
            resolution: StorageResolution::Standard,
        }
    }

    /// Adds a label to the metric.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds every label from an iterator of key/value pairs.
    #[must_use]
    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in labels {
            self.labels.insert(key.into(), value.into());
        }
        self
    }

    /// Sets the unit of the metric.
    #[must_use]
    pub fn with_unit(mut self, unit: MetricUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Sets the storage resolution of the metric.
    #[must_use]
    pub fn with_resolution(mut self, resolution: StorageResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Sets the timestamp of the metric.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Validates the metric.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is empty
    /// - The value is NaN or infinite
    /// - A label name is empty
    pub fn validate_metric(&self) -> Result<(), MetricValidationError> {
        if self.name.is_empty() {
            return Err(MetricValidationError::EmptyName);
        }

        if !self.value.is_finite() {
            return Err(MetricValidationError::NonFiniteValue);
        }

        if let Some(key) = self.labels.keys().find(|k| k.trim().is_empty()) {
            return Err(MetricValidationError::InvalidLabelName(key.clone()));
        }

        self.validate()?;
        Ok(())
    }

    /// Returns true if every given label is present on this metric with the same value.
    #[must_use]
    pub fn matches_labels(&self, labels: &HashMap<String, String>) -> bool {
        labels
            .iter()
            .all(|(key, value)| self.labels.get(key).is_some_and(|v| v == value))
    }
}
