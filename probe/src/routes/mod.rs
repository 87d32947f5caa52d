//! API route definitions.
//!
//! This module organizes all HTTP routes for the probe's server.

mod health;
mod snapshot;
mod stream;

pub use health::health_routes;
pub use snapshot::snapshot_routes;
pub use stream::stream_routes;
