pub mod access_log;
pub mod metrics;
pub mod prometheus_exporter;

pub use access_log::AccessLogEntry;
pub use metrics::{CacheState, MetricsSink, PrometheusMetricsSink};
