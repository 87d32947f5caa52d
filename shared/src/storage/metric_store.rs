//! Metric storage trait and implementations.
//!
//! Provides the `MetricStore` trait that stands in for the metrics backend,
//! an `InMemoryMetricStore` for development and testing, and a
//! `ClickHouseMetricStore` for persistent series.

use crate::models::{Metric, MetricUnit, StorageResolution};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur during metric store operations.
#[derive(Debug, Error)]
pub enum MetricStoreError {
    /// Failed to acquire lock on the store.
    #[error("Failed to acquire lock on metric store")]
    LockError,

    /// The sample was rejected by the backend.
    #[error("Metric rejected: {0}")]
    Rejected(String),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Query parameters for retrieving metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    /// Filter by metric name.
    pub name: Option<String>,

    /// Filter metrics starting from this time (inclusive).
    pub start_time: Option<DateTime<Utc>>,

    /// Filter metrics up to this time (exclusive).
    pub end_time: Option<DateTime<Utc>>,

    /// Filter by labels (all must match).
    pub labels: HashMap<String, String>,

    /// Maximum number of metrics to return.
    pub limit: Option<usize>,
}

impl MetricQuery {
    /// Creates a new empty query (returns all metrics).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the metric name filter.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the start time filter.
    #[must_use]
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Sets the end time filter.
    #[must_use]
    pub fn with_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    /// Adds a label filter.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, metric: &Metric) -> bool {
        if let Some(ref name) = self.name {
            if &metric.name != name {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if metric.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if metric.timestamp >= end {
                return false;
            }
        }
        metric.matches_labels(&self.labels)
    }
}

/// Result of a metric query operation.
#[derive(Debug, Clone)]
pub struct MetricQueryResult {
    /// The metrics matching the query, oldest first.
    pub metrics: Vec<Metric>,

    /// Total count of matching metrics (before limit applied).
    pub total_count: usize,
}

/// Aggregation function for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationFunction {
    /// Sum of values.
    Sum,
    /// Average of values.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Count of values.
    Count,
}

impl AggregationFunction {
    #[allow(clippy::cast_precision_loss)]
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Self::Sum => values.iter().sum(),
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Count => values.len() as f64,
        }
    }

    const fn sql(self) -> &'static str {
        match self {
            Self::Sum => "sum(value)",
            Self::Avg => "avg(value)",
            Self::Min => "min(value)",
            Self::Max => "max(value)",
            Self::Count => "toFloat64(count())",
        }
    }
}

/// One aggregated period of a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    /// Start of the period.
    pub bucket_start: DateTime<Utc>,
    /// Aggregated value for the period.
    pub value: f64,
    /// Number of samples in the period.
    pub count: usize,
}

/// Trait for metric storage implementations.
///
/// This trait defines the interface for storing and querying metrics.
/// Implementations must be thread-safe (Send + Sync).
pub trait MetricStore: Send + Sync {
    /// Inserts a single metric into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn insert(&self, metric: Metric) -> Result<(), MetricStoreError>;

    /// Queries metrics based on the provided parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the query operation fails.
    fn query(&self, query: MetricQuery) -> Result<MetricQueryResult, MetricStoreError>;

    /// Returns the total number of metrics in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn count(&self) -> Result<usize, MetricStoreError>;

    /// Clears all metrics from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the clear operation fails.
    fn clear(&self) -> Result<(), MetricStoreError>;

    /// Aggregates matching metrics into fixed periods, oldest period first.
    ///
    /// Periods are aligned to the Unix epoch. Empty periods are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or `period` is not positive.
    fn aggregate_series(
        &self,
        query: MetricQuery,
        period: Duration,
        function: AggregationFunction,
    ) -> Result<Vec<SeriesPoint>, MetricStoreError> {
        let period_ms = period.num_milliseconds();
        if period_ms <= 0 {
            return Err(MetricStoreError::StorageError(
                "Series period must be positive".to_string(),
            ));
        }

        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for metric in self.query(query)?.metrics {
            let bucket = metric.timestamp.timestamp_millis().div_euclid(period_ms);
            buckets.entry(bucket).or_default().push(metric.value);
        }

        Ok(buckets
            .into_iter()
            .filter_map(|(bucket, values)| {
                DateTime::from_timestamp_millis(bucket * period_ms).map(|bucket_start| {
                    SeriesPoint {
                        bucket_start,
                        value: function.apply(&values),
                        count: values.len(),
                    }
                })
            })
            .collect())
    }
}

/// In-memory metric store implementation.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    metrics: Arc<RwLock<Vec<Metric>>>,
}

impl InMemoryMetricStore {
    /// Creates a new empty in-memory metric store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates a new in-memory metric store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl MetricStore for InMemoryMetricStore {
    fn insert(&self, metric: Metric) -> Result<(), MetricStoreError> {
        metric
            .validate_metric()
            .map_err(|e| MetricStoreError::Rejected(e.to_string()))?;
        let mut metrics = self
            .metrics
            .write()
            .map_err(|_| MetricStoreError::LockError)?;
        metrics.push(metric);
        Ok(())
    }

    fn query(&self, query: MetricQuery) -> Result<MetricQueryResult, MetricStoreError> {
        let metrics = self
            .metrics
            .read()
            .map_err(|_| MetricStoreError::LockError)?;

        let mut filtered: Vec<Metric> = metrics
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        filtered.sort_by_key(|m| m.timestamp);

        let total_count = filtered.len();
        filtered.truncate(query.limit.unwrap_or(usize::MAX));

        Ok(MetricQueryResult {
            metrics: filtered,
            total_count,
        })
    }

    fn count(&self) -> Result<usize, MetricStoreError> {
        let metrics = self
            .metrics
            .read()
            .map_err(|_| MetricStoreError::LockError)?;
        Ok(metrics.len())
    }

    fn clear(&self) -> Result<(), MetricStoreError> {
        let mut metrics = self
            .metrics
            .write()
            .map_err(|_| MetricStoreError::LockError)?;
        metrics.clear();
        Ok(())
    }
}

/// `ClickHouse`-backed metric store implementation.
///
/// Stores samples in the `metrics` table and pushes period aggregation down
/// to the database.
#[derive(Clone)]
pub struct ClickHouseMetricStore {
    client: Arc<clickhouse::Client>,
}

#[derive(clickhouse::Row, serde::Serialize, serde::Deserialize)]
struct MetricRow {
    timestamp: i64,
    name: String,
    value: f64,
    labels: HashMap<String, String>,
    unit: String,
    resolution: u32,
}

impl From<Metric> for MetricRow {
    fn from(metric: Metric) -> Self {
        Self {
            timestamp: metric.timestamp.timestamp_nanos_opt().unwrap_or(0),
            name: metric.name,
            value: metric.value,
            labels: metric.labels,
            unit: metric.unit.to_string(),
            resolution: metric.resolution.as_secs(),
        }
    }
}

impl From<MetricRow> for Metric {
    fn from(row: MetricRow) -> Self {
        Self {
            name: row.name,
            value: row.value,
            timestamp: DateTime::from_timestamp_nanos(row.timestamp),
            labels: row.labels,
            unit: row.unit.parse().unwrap_or(MetricUnit::None),
            resolution: if row.resolution == 1 {
                StorageResolution::High
            } else {
                StorageResolution::Standard
            },
        }
    }
}

impl ClickHouseMetricStore {
    /// Creates a new `ClickHouse` metric store with the given client.
    #[must_use]
    pub fn new(client: Arc<clickhouse::Client>) -> Self {
        Self { client }
    }

    /// Creates a new `ClickHouse` metric store wrapped in an Arc.
    #[must_use]
    pub fn new_shared(client: Arc<clickhouse::Client>) -> Arc<Self> {
        Arc::new(Self::new(client))
    }

    /// Helper to execute async operations synchronously.
    fn block_on<F, T>(future: F) -> Result<T, MetricStoreError>
    where
        F: std::future::Future<Output = Result<T, clickhouse::error::Error>>,
    {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(future)
                .map_err(|e| MetricStoreError::StorageError(e.to_string()))
        })
    }
}

/// A value bound to a `?` placeholder of a [`Filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterValue {
    Text(String),
    Nanos(i64),
}

/// `WHERE` clause of a `ClickHouse` query with its bound values.
///
/// Values never appear in the SQL text; the client escapes them when binding.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Filter {
    clause: String,
    values: Vec<FilterValue>,
}

impl Filter {
    fn new(query: &MetricQuery) -> Self {
        let mut clause = String::from(" WHERE 1=1");
        let mut values = Vec::new();

        if let Some(ref name) = query.name {
            clause.push_str(" AND name = ?");
            values.push(FilterValue::Text(name.clone()));
        }
        if let Some(start) = query.start_time {
            clause.push_str(" AND timestamp >= ?");
            values.push(FilterValue::Nanos(start.timestamp_nanos_opt().unwrap_or(0)));
        }
        if let Some(end) = query.end_time {
            clause.push_str(" AND timestamp < ?");
            values.push(FilterValue::Nanos(
                end.timestamp_nanos_opt().unwrap_or(i64::MAX),
            ));
        }

        let mut labels: Vec<_> = query.labels.iter().collect();
        labels.sort();
        for (key, value) in labels {
            clause.push_str(" AND labels[?] = ?");
            values.push(FilterValue::Text(key.clone()));
            values.push(FilterValue::Text(value.clone()));
        }

        Self { clause, values }
    }

    /// Binds the filter values to `query` in placeholder order.
    fn bind(&self, mut query: clickhouse::query::Query) -> clickhouse::query::Query {
        for value in &self.values {
            query = match value {
                FilterValue::Text(text) => query.bind(text.as_str()),
                FilterValue::Nanos(nanos) => query.bind(*nanos),
            };
        }
        query
    }
}

impl MetricStore for ClickHouseMetricStore {
    fn insert(&self, metric: Metric) -> Result<(), MetricStoreError> {
        metric
            .validate_metric()
            .map_err(|e| MetricStoreError::Rejected(e.to_string()))?;

        let client = Arc::clone(&self.client);
        Self::block_on(async move {
            let mut inserter = client.insert::<MetricRow>("metrics").await?;
            inserter.write(&MetricRow::from(metric)).await?;
            inserter.end().await?;
            Ok(())
        })
    }

    fn query(&self, query: MetricQuery) -> Result<MetricQueryResult, MetricStoreError> {
        let filter = Filter::new(&query);
        let count_sql = format!("SELECT count() FROM metrics{}", filter.clause);
        let sql = format!(
            "SELECT timestamp, name, value, labels, unit, resolution FROM metrics{} ORDER BY timestamp ASC LIMIT {}",
            filter.clause,
            query.limit.unwrap_or(10_000)
        );

        let client = Arc::clone(&self.client);
        Self::block_on(async move {
            let total_count: u64 = filter
                .bind(client.query(&count_sql))
                .fetch_one::<u64>()
                .await?;
            let rows: Vec<MetricRow> = filter
                .bind(client.query(&sql))
                .fetch_all::<MetricRow>()
                .await?;

            Ok(MetricQueryResult {
                metrics: rows.into_iter().map(Metric::from).collect(),
                total_count: usize::try_from(total_count).unwrap_or(usize::MAX),
            })
        })
    }

    fn count(&self) -> Result<usize, MetricStoreError> {
        let client = Arc::clone(&self.client);
        let count: u64 = Self::block_on(async move {
            client
                .query("SELECT count() FROM metrics")
                .fetch_one::<u64>()
                .await
        })?;

        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn clear(&self) -> Result<(), MetricStoreError> {
        let client = Arc::clone(&self.client);
        Self::block_on(async move { client.query("TRUNCATE TABLE metrics").execute().await })
    }

    fn aggregate_series(
        &self,
        query: MetricQuery,
        period: Duration,
        function: AggregationFunction,
    ) -> Result<Vec<SeriesPoint>, MetricStoreError> {
        #[derive(clickhouse::Row, serde::Deserialize)]
        struct BucketRow {
            bucket: i64,
            agg_value: f64,
            sample_count: u64,
        }

        let period_ns = period.num_nanoseconds().unwrap_or(0);
        if period_ns <= 0 {
            return Err(MetricStoreError::StorageError(
                "Series period must be positive".to_string(),
            ));
        }

        let filter = Filter::new(&query);
        let sql = format!(
            "SELECT intDiv(timestamp, {period_ns}) AS bucket, {} AS agg_value, count() AS sample_count FROM metrics{} GROUP BY bucket ORDER BY bucket ASC",
            function.sql(),
            filter.clause
        );

        let client = Arc::clone(&self.client);
        Self::block_on(async move {
            let rows: Vec<BucketRow> = filter
                .bind(client.query(&sql))
                .fetch_all::<BucketRow>()
                .await?;

            Ok(rows
                .into_iter()
                .map(|row| SeriesPoint {
                    bucket_start: DateTime::from_timestamp_nanos(row.bucket * period_ns),
                    value: row.agg_value,
                    count: usize::try_from(row.sample_count).unwrap_or(usize::MAX),
                })
                .collect())
        })
    }
}
