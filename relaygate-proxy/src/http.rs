use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::HeaderMap;
use relaygate_core::ChainRoute;
use reqwest::Client;
use tokio::sync::Semaphore;

const MAX_ATTEMPTS: usize = 3;
const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_PER_HOST: usize = 10_000;

/// Bounds in-flight requests per upstream host. `reqwest`'s connector
/// already caps idle sockets per host, but the documented ceiling is
/// enforced explicitly here rather than left to connector defaults.
#[derive(Debug, Default)]
pub struct HostSemaphores {
    permits: DashMap<String, Arc<Semaphore>>,
}

impl HostSemaphores {
    pub fn new() -> Self {
        HostSemaphores::default()
    }

    fn for_host(&self, host: &str) -> Arc<Semaphore> {
        self.permits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(MAX_CONCURRENT_PER_HOST)))
            .clone()
    }
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwarded response, already stripped of hop-by-hop headers.
pub struct ForwardedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("all retries exhausted: {0}")]
    Exhausted(String),
}

/// What the last attempt actually produced, tracked across retries so the
/// caller can surface it verbatim once attempts are exhausted rather than
/// a synthesized failure.
enum LastAttempt {
    Response(ForwardedResponse),
    Transport(String),
}

/// Determines whether this request should be treated as an SSE stream,
/// per the "`Accept: text/event-stream`, or residual path contains
/// `stream`" rule — suppressed for chains whose name contains `thor`
/// case-insensitively (a known upstream that uses `stream` in non-SSE
/// paths).
pub fn is_sse_request(accept_header: Option<&str>, residual: &str, chain: &str) -> bool {
    if chain.to_ascii_lowercase().contains("thor") {
        return false;
    }
    let accept_is_sse = accept_header
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);
    accept_is_sse || residual.contains("stream")
}

/// Round-robin retry loop across `route.http_upstreams`: up to
/// [`MAX_ATTEMPTS`], each with its own per-attempt deadline. A transport
/// error or a 5xx status advances to the next attempt; anything else is
/// returned immediately. The incoming method and body are forwarded
/// unmodified — no request-body transformation. If every attempt fails,
/// the last attempt's outcome is what's returned: a real 5xx response is
/// surfaced with its original status and body, not folded into a
/// synthetic failure.
pub async fn forward_http(
    client: &Client,
    host_semaphores: &HostSemaphores,
    route: &ChainRoute,
    residual: &str,
    api_key: &str,
    incoming_xff: Option<&str>,
    method: reqwest::Method,
    body: bytes::Bytes,
) -> Result<ForwardedResponse, ForwardError> {
    let mut last = LastAttempt::Transport("no upstreams configured".to_string());

    for attempt in 0..MAX_ATTEMPTS {
        let Some(base) = route.http_upstream(attempt) else {
            break;
        };
        let url = format!("{base}{residual}");

        let semaphore = host_semaphores.for_host(base);
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => continue,
        };

        let mut req = client
            .request(method.clone(), &url)
            .body(body.clone())
            .timeout(PER_ATTEMPT_TIMEOUT);
        if let Some(xff) = incoming_xff {
            req = req.header("X-Forwarded-For", xff);
        }
        req = req.header("API-Key", api_key);

        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers = strip_hop_by_hop(resp.headers());
                let body = resp.bytes().await.unwrap_or_default();
                let forwarded = ForwardedResponse { status, headers, body };
                if (500..600).contains(&status) {
                    last = LastAttempt::Response(forwarded);
                    continue;
                }
                return Ok(forwarded);
            }
            Err(e) => {
                last = LastAttempt::Transport(e.to_string());
                continue;
            }
        }
    }

    match last {
        LastAttempt::Response(resp) => Ok(resp),
        LastAttempt::Transport(msg) => Err(ForwardError::Exhausted(msg)),
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Binds an ephemeral port, accepts exactly one connection, and writes
    /// `response` verbatim before closing — one upstream's worth of a retry
    /// sequence.
    async fn spawn_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    const SERVICE_UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 13\r\n\r\nbusy upstream";
    const OK_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

    #[tokio::test]
    async fn test_retries_past_5xx_then_succeeds() {
        let upstreams = vec![
            spawn_once(SERVICE_UNAVAILABLE).await,
            spawn_once(SERVICE_UNAVAILABLE).await,
            spawn_once(OK_RESPONSE).await,
        ];
        let route = ChainRoute::new("ethereum", upstreams, vec![]);
        let client = Client::new();
        let semaphores = HostSemaphores::new();

        let resp = forward_http(
            &client,
            &semaphores,
            &route,
            "/v1/accounts",
            "k1",
            None,
            reqwest::Method::GET,
            bytes::Bytes::new(),
        )
        .await
        .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"ok");
    }

    #[tokio::test]
    async fn test_exhausted_retries_preserve_last_real_status() {
        let upstreams = vec![
            spawn_once(SERVICE_UNAVAILABLE).await,
            spawn_once(SERVICE_UNAVAILABLE).await,
            spawn_once(SERVICE_UNAVAILABLE).await,
        ];
        let route = ChainRoute::new("ethereum", upstreams, vec![]);
        let client = Client::new();
        let semaphores = HostSemaphores::new();

        let resp = forward_http(
            &client,
            &semaphores,
            &route,
            "/v1/accounts",
            "k1",
            None,
            reqwest::Method::GET,
            bytes::Bytes::new(),
        )
        .await
        .expect("a real 5xx response must be surfaced, not turned into an error");

        assert_eq!(resp.status, 503);
        assert_eq!(&resp.body[..], b"busy upstream");
    }

    #[tokio::test]
    async fn test_no_upstreams_is_exhausted_with_transport_message() {
        let route = ChainRoute::new("ethereum", vec![], vec![]);
        let client = Client::new();
        let semaphores = HostSemaphores::new();

        let err = forward_http(
            &client,
            &semaphores,
            &route,
            "/v1/accounts",
            "k1",
            None,
            reqwest::Method::GET,
            bytes::Bytes::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ForwardError::Exhausted(_)));
    }

    #[test]
    fn test_sse_detection_on_accept_header() {
        assert!(is_sse_request(Some("text/event-stream"), "", "ethereum"));
    }

    #[test]
    fn test_sse_detection_on_stream_in_residual() {
        assert!(is_sse_request(None, "/v1/stream/logs", "ethereum"));
    }

    #[test]
    fn test_sse_suppressed_for_thor_chains() {
        assert!(!is_sse_request(None, "/v1/stream/logs", "thorchain"));
        assert!(!is_sse_request(None, "/v1/stream/logs", "THORChain"));
    }

    #[test]
    fn test_not_sse_by_default() {
        assert!(!is_sse_request(Some("application/json"), "/accounts/1", "ethereum"));
    }

    #[test]
    fn test_strip_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Connection", "keep-alive".parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers.insert("Transfer-Encoding", "chunked".parse().unwrap());

        let stripped = strip_hop_by_hop(&headers);
        assert!(stripped.get("connection").is_none());
        assert!(stripped.get("transfer-encoding").is_none());
        assert_eq!(stripped.get("content-type").unwrap(), "application/json");
    }
}
