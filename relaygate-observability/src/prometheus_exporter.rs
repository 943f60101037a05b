use crate::metrics::PrometheusMetricsSink;

/// Prometheus exposition endpoint handler — returns the text format served
/// by `GET /metrics`.
pub fn render_metrics(sink: &PrometheusMetricsSink) -> String {
    sink.gather_text()
}
