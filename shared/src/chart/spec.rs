//! Declarative chart specification.
//!
//! A `ChartSpec` describes what the rendering collaborator should draw: which
//! series, over which window, at which period and statistic, through which
//! derived expression, and how it should look.

use crate::config::{ExecutionIdentity, METRIC_NAMESPACE};
use crate::storage::AggregationFunction;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Name of the latency metric.
pub const LATENCY_METRIC_NAME: &str = "ttl-latency";

/// Statistic applied to each period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statistic {
    /// Largest sample in the period.
    Maximum,
    /// Smallest sample in the period.
    Minimum,
    /// Mean of the samples in the period.
    Average,
    /// Sum of the samples in the period.
    Sum,
    /// Number of samples in the period.
    SampleCount,
}

impl From<Statistic> for AggregationFunction {
    fn from(statistic: Statistic) -> Self {
        match statistic {
            Statistic::Maximum => Self::Max,
            Statistic::Minimum => Self::Min,
            Statistic::Average => Self::Avg,
            Statistic::Sum => Self::Sum,
            Statistic::SampleCount => Self::Count,
        }
    }
}

/// Expression deriving the plotted value from the raw metric `m1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesExpression {
    /// Plot `m1` unchanged.
    Identity,
    /// Convert milliseconds to minutes: `(m1 / 1000) / 60`.
    MillisToMinutes,
}

impl SeriesExpression {
    /// Returns the expression in metric-math syntax.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "m1",
            Self::MillisToMinutes => "(m1 / 1000) / 60",
        }
    }

    /// Applies the expression to a raw value.
    #[must_use]
    pub fn apply(&self, m1: f64) -> f64 {
        match self {
            Self::Identity => m1,
            Self::MillisToMinutes => (m1 / 1000.0) / 60.0,
        }
    }
}

/// Left y-axis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YAxis {
    /// Lower bound of the axis.
    pub min: f64,
    /// Axis label.
    pub label: String,
    /// Whether to print the unit next to the label.
    pub show_units: bool,
}

/// A time-series chart request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Chart title.
    pub title: String,
    /// Namespace of the source metric.
    pub namespace: String,
    /// Name of the source metric.
    pub metric_name: String,
    /// Dimensions selecting the source series.
    pub dimensions: BTreeMap<String, String>,
    /// Derived expression plotted instead of the raw metric.
    pub expression: SeriesExpression,
    /// Legend label of the plotted expression.
    pub label: String,
    /// Statistic applied per period.
    pub statistic: Statistic,
    /// Aggregation period in seconds.
    pub period_secs: u32,
    /// Lookback window in seconds, ending at `end`.
    pub window_secs: u32,
    /// End of the plotted window.
    pub end: DateTime<Utc>,
    /// Left y-axis.
    pub y_axis: YAxis,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Identity the metric source is addressed with.
    pub identity: ExecutionIdentity,
}

impl ChartSpec {
    /// Builds the TTL latency chart for `identity`, ending at `now`.
    ///
    /// 24 hours of the maximum latency per minute, plotted in minutes.
    #[must_use]
    pub fn ttl_latency(identity: &ExecutionIdentity, now: DateTime<Utc>) -> Self {
        let dimensions = identity
            .metric_dimensions()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            title: format!(
                "DynamoDB TTL Latency (updated @ {})",
                now.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            namespace: METRIC_NAMESPACE.to_string(),
            metric_name: LATENCY_METRIC_NAME.to_string(),
            dimensions,
            expression: SeriesExpression::MillisToMinutes,
            label: "Time elapsed between TTL and removal".to_string(),
            statistic: Statistic::Maximum,
            period_secs: 60,
            window_secs: 24 * 60 * 60,
            end: now,
            y_axis: YAxis {
                min: 0.0,
                label: "Minutes".to_string(),
                show_units: false,
            },
            width: 768,
            height: 384,
            identity: identity.clone(),
        }
    }

    /// Returns the aggregation period.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::seconds(i64::from(self.period_secs))
    }

    /// Returns the lookback window.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.window_secs))
    }

    /// Returns the start of the plotted window.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.end - self.window()
    }

    /// Returns the window start in relative ISO-8601 notation (e.g. `-PT24H`).
    #[must_use]
    pub fn relative_start(&self) -> String {
        if self.window_secs % 3600 == 0 {
            format!("-PT{}H", self.window_secs / 3600)
        } else if self.window_secs % 60 == 0 {
            format!("-PT{}M", self.window_secs / 60)
        } else {
            format!("-PT{}S", self.window_secs)
        }
    }

    /// Validates the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the period, window or image size is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.period_secs == 0 {
            return Err("Chart period must be greater than zero".to_string());
        }
        if self.window_secs < self.period_secs {
            return Err("Chart window must cover at least one period".to_string());
        }
        if !(16..=4096).contains(&self.width) || !(16..=4096).contains(&self.height) {
            return Err(format!(
                "Chart size {}x{} outside 16..=4096",
                self.width, self.height
            ));
        }
        Ok(())
    }

    /// Renders the spec as a metric-widget document for a remote renderer.
    #[must_use]
    pub fn to_widget_json(&self) -> Value {
        let mut source_metric = vec![json!(self.namespace), json!(self.metric_name)];
        for (key, value) in &self.dimensions {
            source_metric.push(json!(key));
            source_metric.push(json!(value));
        }
        source_metric.push(json!({
            "id": "m1",
            "visible": false,
            "period": self.period_secs,
            "region": self.identity.region,
            "accountId": self.identity.account_id,
        }));

        json!({
            "metrics": [
                [{
                    "expression": self.expression.as_str(),
                    "label": self.label,
                    "id": "e1",
                    "region": self.identity.region,
                    "accountId": self.identity.account_id,
                }],
                source_metric,
            ],
            "sparkline": false,
            "view": "timeSeries",
            "stacked": false,
            "region": self.identity.region,
            "stat": self.statistic,
            "period": self.period_secs,
            "start": self.relative_start(),
            "yAxis": {
                "left": {
                    "min": self.y_axis.min,
                    "showUnits": self.y_axis.show_units,
                    "label": self.y_axis.label,
                }
            },
            "liveData": false,
            "setPeriodToTimeRange": true,
            "title": self.title,
            "width": self.width,
            "height": self.height,
            "theme": "dark",
        })
    }
}
