//! Latency chart specification and rendering.

pub mod raster;
pub mod renderer;
pub mod spec;

pub use renderer::{ChartRenderer, MetricStoreRenderer, RenderError, RenderedChart};
pub use spec::{ChartSpec, SeriesExpression, Statistic, YAxis, LATENCY_METRIC_NAME};
