//! Chart rendering.
//!
//! `ChartRenderer` is the rendering collaborator: it takes a [`ChartSpec`]
//! and returns a binary image. `MetricStoreRenderer` implements it against a
//! [`MetricStore`], plotting the aggregated series as a PNG line chart.

use super::raster::{Canvas, Rgb};
use super::spec::ChartSpec;
use crate::storage::{MetricQuery, MetricStore, MetricStoreError, PNG_CONTENT_TYPE};
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while rendering a chart.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The chart spec cannot be rendered.
    #[error("Invalid chart spec: {0}")]
    InvalidSpec(String),

    /// The series could not be read from the metrics backend.
    #[error("Failed to read series: {0}")]
    Source(#[from] MetricStoreError),

    /// The image could not be encoded.
    #[error("Failed to encode image: {0}")]
    Encode(#[from] std::io::Error),
}

/// A rendered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChart {
    /// Encoded image bytes.
    pub image: Vec<u8>,
    /// MIME type of `image`.
    pub content_type: &'static str,
    /// Number of plotted periods.
    pub points: usize,
}

/// Trait for chart rendering implementations.
pub trait ChartRenderer: Send + Sync {
    /// Renders the chart described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid or the data cannot be read.
    fn render(&self, spec: &ChartSpec) -> Result<RenderedChart, RenderError>;
}

/// Dark chart palette.
mod palette {
    use super::Rgb;

    pub const BACKGROUND: Rgb = Rgb(0x1b, 0x23, 0x2d);
    pub const AXIS: Rgb = Rgb(0x9b, 0xa7, 0xb4);
    pub const GRID: Rgb = Rgb(0x33, 0x3e, 0x4b);
    pub const SERIES: Rgb = Rgb(0x08, 0x86, 0xd8);
}

const MARGIN_LEFT: u32 = 48;
const MARGIN_RIGHT: u32 = 16;
const MARGIN_TOP: u32 = 16;
const MARGIN_BOTTOM: u32 = 24;
const GRID_LINES: u32 = 4;

/// Renders charts from a metric store.
#[derive(Clone)]
pub struct MetricStoreRenderer {
    store: Arc<dyn MetricStore>,
}

impl MetricStoreRenderer {
    /// Creates a renderer reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// Reads the plotted points: `(seconds since window start, value)`.
    fn series(&self, spec: &ChartSpec) -> Result<Vec<(i64, f64)>, RenderError> {
        let mut query = MetricQuery::new()
            .with_name(spec.metric_name.clone())
            .with_start_time(spec.start())
            // the window is closed at `end`
            .with_end_time(spec.end + Duration::nanoseconds(1));
        for (key, value) in &spec.dimensions {
            query = query.with_label(key.clone(), value.clone());
        }

        let points = self
            .store
            .aggregate_series(query, spec.period(), spec.statistic.into())?;

        let start = spec.start();
        Ok(points
            .into_iter()
            .map(|p| {
                (
                    (p.bucket_start - start).num_seconds().max(0),
                    spec.expression.apply(p.value),
                )
            })
            .collect())
    }
}

impl ChartRenderer for MetricStoreRenderer {
    fn render(&self, spec: &ChartSpec) -> Result<RenderedChart, RenderError> {
        spec.validate().map_err(RenderError::InvalidSpec)?;
        if spec.width <= MARGIN_LEFT + MARGIN_RIGHT || spec.height <= MARGIN_TOP + MARGIN_BOTTOM {
            return Err(RenderError::InvalidSpec(
                "Chart too small for plot margins".to_string(),
            ));
        }

        let series = self.series(spec)?;
        let mut canvas = Canvas::new(spec.width, spec.height, palette::BACKGROUND);

        let left = i64::from(MARGIN_LEFT);
        let right = i64::from(spec.width - MARGIN_RIGHT);
        let top = i64::from(MARGIN_TOP);
        let bottom = i64::from(spec.height - MARGIN_BOTTOM);

        for i in 1..=GRID_LINES {
            let y = bottom - (bottom - top) * i64::from(i) / i64::from(GRID_LINES);
            canvas.line((left, y), (right, y), palette::GRID);
        }
        canvas.line((left, top), (left, bottom), palette::AXIS);
        canvas.line((left, bottom), (right, bottom), palette::AXIS);

        let y_min = spec.y_axis.min;
        let y_max = series
            .iter()
            .map(|&(_, v)| v)
            .fold(y_min, f64::max)
            .max(y_min + 1.0)
            * 1.1;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let to_pixel = |(offset, value): (i64, f64)| -> (i64, i64) {
            let x = left + (right - left) * offset / i64::from(spec.window_secs).max(1);
            let ratio = (value.max(y_min) - y_min) / (y_max - y_min);
            let y = bottom - ((bottom - top) as f64 * ratio).round() as i64;
            (x, y)
        };

        let pixels: Vec<(i64, i64)> = series.iter().copied().map(to_pixel).collect();
        for pair in pixels.windows(2) {
            canvas.line(pair[0], pair[1], palette::SERIES);
        }
        for &(x, y) in &pixels {
            canvas.dot(x, y, 1, palette::SERIES);
        }

        Ok(RenderedChart {
            image: canvas.to_png(&spec.title)?,
            content_type: PNG_CONTENT_TYPE,
            points: series.len(),
        })
    }
}
