use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Fire-and-forget counters incremented at the points specified for each
/// component. The sink is advisory: failure to record must never affect
/// request outcome, so every method here is infallible by construction.
pub trait MetricsSink: Send + Sync {
    fn record_request(&self, api_key: &str, org: &str, org_id: &str, chain: &str, status: &str);
    fn record_cache_state(&self, state: CacheState);
    fn record_http_status(&self, status_code: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Hit,
    Miss,
    Invalid,
}

impl CacheState {
    fn as_label(self) -> &'static str {
        match self {
            CacheState::Hit => "HIT",
            CacheState::Miss => "MISS",
            CacheState::Invalid => "INVALID",
        }
    }
}

/// `MetricsSink` backed by a `prometheus::Registry`, exposed via the
/// metrics endpoint's `GET /metrics`.
pub struct PrometheusMetricsSink {
    registry: Registry,
    requests_by_api_key: IntCounterVec,
    cache_hits: IntCounterVec,
    http_requests_total: IntCounterVec,
}

impl PrometheusMetricsSink {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_by_api_key = IntCounterVec::new(
            Opts::new("requests_by_api_key", "Requests per api key, org, chain, and status"),
            &["api_key", "org", "org_id", "chain", "status"],
        )?;
        let cache_hits = IntCounterVec::new(
            Opts::new("cache_hits", "Authorization cache outcome"),
            &["state"],
        )?;
        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Terminal HTTP/SSE status codes"),
            &["status_code"],
        )?;

        registry.register(Box::new(requests_by_api_key.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(PrometheusMetricsSink {
            registry,
            requests_by_api_key,
            cache_hits,
            http_requests_total,
        })
    }

    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record_request(&self, api_key: &str, org: &str, org_id: &str, chain: &str, status: &str) {
        self.requests_by_api_key
            .with_label_values(&[api_key, org, org_id, chain, status])
            .inc();
    }

    fn record_cache_state(&self, state: CacheState) {
        self.cache_hits.with_label_values(&[state.as_label()]).inc();
    }

    fn record_http_status(&self, status_code: &str) {
        self.http_requests_total.with_label_values(&[status_code]).inc();
    }
}

impl Default for PrometheusMetricsSink {
    fn default() -> Self {
        Self::new().expect("prometheus metric registration cannot fail for fixed label sets")
    }
}
