use serde::Serialize;
use tracing::info;

/// Structured per-request log entry, emitted at `info` on the hot path.
/// Not a sink of its own — `tracing`'s subscriber (A4) is the only
/// destination; there is no buffering/flush pipeline here.
#[derive(Debug, Serialize)]
pub struct AccessLogEntry {
    pub api_key: String,
    pub org: String,
    pub chain: String,
    pub client_ip: String,
    pub method: String,
    pub uri: String,
    pub response_status: u16,
    pub latency_ms: f64,
    pub upstream_addr: Option<String>,
}

impl AccessLogEntry {
    pub fn log(&self) {
        info!(
            api_key = %self.api_key,
            org = %self.org,
            chain = %self.chain,
            client_ip = %self.client_ip,
            method = %self.method,
            uri = %self.uri,
            status = self.response_status,
            latency_ms = self.latency_ms,
            upstream_addr = self.upstream_addr.as_deref().unwrap_or("-"),
            "request"
        );
    }
}
