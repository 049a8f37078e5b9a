//! Metric name constants and recording helpers

use std::time::Instant;

use opentelemetry::metrics::Histogram;

/// Record a duration measurement on a histogram
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[opentelemetry::KeyValue]) {
    let duration = start.elapsed().as_secs_f64();
    histogram.record(duration, attributes);
}

// HTTP metric names
pub const HTTP_REQUEST_DURATION: &str = "http.server.request.duration";
pub const HTTP_REQUEST_COUNT: &str = "http.server.request.count";

// Pipeline metric names
pub const PIPELINE_REQUEST_DURATION: &str = "pipeline.request.duration";
pub const PIPELINE_REQUEST_COUNT: &str = "pipeline.request.count";
pub const PIPELINE_HANDSHAKE_DURATION: &str = "pipeline.handshake.duration";

// Router metric names
pub const ROUTER_BLACKLIST_COUNT: &str = "router.blacklist.count";
pub const ROUTER_REACTIVATION_COUNT: &str = "router.reactivation.count";
