use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use relaygate_core::{ApiKeyRecord, ChainRoute, GatewayError};
use relaygate_observability::AccessLogEntry;
use relaygate_proxy::http::{forward_http, is_sse_request};
use relaygate_proxy::sse::{connect_upstream, relay_events, EventSink};
use relaygate_proxy::websocket::pump;
use relaygate_proxy::{parse_route, AdmissionOutcome, GatewayState, Route};

const DISPATCH_DEADLINE: Duration = Duration::from_secs(20);

/// Single entry point for every transport: ordinary HTTP, SSE, and
/// WebSocket upgrades all land here and are routed after admission.
pub async fn handle(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("").to_string();
    let header_api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    let Some(route) = parse_route(&path, &query, header_api_key) else {
        return error_response(&state, GatewayError::BadRoute);
    };

    let client_ip = client_ip(&headers, addr);
    let outcome = state.admit(route.clone(), &client_ip).await;

    match outcome {
        AdmissionOutcome::Health => (StatusCode::OK, "OK").into_response(),
        AdmissionOutcome::Rejected(err) => error_response(&state, err),
        AdmissionOutcome::Admitted { record, route: chain_route } => {
            let residual = residual_of(&route);

            if let Some(ws) = ws {
                return accept_websocket(ws, state, chain_route, record, client_ip);
            }

            let accept = headers.get("accept").and_then(|v| v.to_str().ok());
            if is_sse_request(accept, &residual, &record.chain) {
                return handle_sse(state, chain_route, residual, record, client_ip).await;
            }

            handle_http(state, chain_route, residual, record, headers, method, body, client_ip, started).await
        }
    }
}

fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            return first.trim().to_string();
        }
    }
    remote.ip().to_string()
}

fn residual_of(route: &Route) -> String {
    match route {
        Route::Health => String::new(),
        Route::Keyed { residual, .. } => residual.clone(),
        Route::Public { residual, .. } => residual.clone(),
    }
}

fn error_response(state: &GatewayState, err: GatewayError) -> Response {
    let status = err.status_code();
    state.metrics.record_http_status(&status.to_string());
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, err.to_body()).into_response()
}

#[allow(clippy::too_many_arguments)]
async fn handle_http(
    state: GatewayState,
    chain_route: ChainRoute,
    residual: String,
    record: ApiKeyRecord,
    headers: HeaderMap,
    method: Method,
    body: Bytes,
    client_ip: String,
    started: Instant,
) -> Response {
    let xff = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let forward = forward_http(
        &state.http_client,
        &state.host_semaphores,
        &chain_route,
        &residual,
        &record.api_key,
        xff,
        reqwest_method,
        body,
    );

    let result = tokio::select! {
        result = forward => result,
        _ = tokio::time::sleep(DISPATCH_DEADLINE) => {
            return error_response(&state, GatewayError::DeadlineExceeded);
        }
    };

    let response = match result {
        Ok(resp) => resp,
        Err(e) => {
            return error_response(&state, GatewayError::UpstreamUnavailable(e.to_string()));
        }
    };

    let status = response.status;
    state.metrics.record_http_status(&status.to_string());
    state.metrics.record_request(
        &record.api_key,
        &record.org,
        &record.org_id,
        &record.chain,
        &status.to_string(),
    );

    AccessLogEntry {
        api_key: record.api_key.clone(),
        org: record.org.clone(),
        chain: record.chain.clone(),
        client_ip,
        method: method.to_string(),
        uri: residual,
        response_status: status,
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        upstream_addr: chain_route.http_upstream(0).map(str::to_string),
    }
    .log();

    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(axum::body::Body::from(response.body))
        .unwrap_or_else(|_| error_response(&state, GatewayError::Internal("malformed upstream response".into())))
}

struct AxumEventSink<'a> {
    writer: &'a mut (dyn tokio::io::AsyncWrite + Unpin + Send),
}

#[async_trait::async_trait]
impl EventSink for AxumEventSink<'_> {
    async fn write_event(&mut self, event: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.write_all(event).await?;
        self.writer.flush().await
    }
}

async fn handle_sse(
    state: GatewayState,
    chain_route: ChainRoute,
    residual: String,
    record: ApiKeyRecord,
    _client_ip: String,
) -> Response {
    let Some(base) = chain_route.http_upstream(0) else {
        return error_response(&state, GatewayError::UpstreamUnavailable("no http upstream for chain".into()));
    };
    let target = format!("{base}{residual}");

    // Dial before reporting success — the 200 and its metrics must only
    // commit once the upstream has actually accepted the stream.
    let mut stream = match connect_upstream(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            return error_response(&state, GatewayError::UpstreamUnavailable(e.to_string()));
        }
    };

    state.metrics.record_http_status("200");
    state.metrics.record_request(
        &record.api_key,
        &record.org,
        &record.org_id,
        &record.chain,
        "200",
    );

    let (client_tx, client_rx) = tokio::io::duplex(64 * 1024);
    let cancel = tokio_util::sync::CancellationToken::new();

    tokio::spawn(async move {
        let (_read_half, mut write_half) = tokio::io::split(client_tx);
        let mut sink = AxumEventSink { writer: &mut write_half };
        if let Err(e) = relay_events(&mut stream, &mut sink, &cancel).await {
            tracing::warn!(error = %e, target = %target, "sse relay ended with an error");
        }
    });

    let stream = tokio_util::io::ReaderStream::new(client_rx);
    let body = axum::body::Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache, no-transform")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| error_response(&state, GatewayError::Internal("failed to build sse response".into())))
}

fn accept_websocket(
    ws: WebSocketUpgrade,
    state: GatewayState,
    chain_route: ChainRoute,
    record: ApiKeyRecord,
    client_ip: String,
) -> Response {
    if chain_route.ws_upstream().is_none() {
        return error_response(&state, GatewayError::UpstreamUnavailable("no websocket upstream for chain".into()));
    }

    ws.on_upgrade(move |socket: WebSocket| async move {
        let metrics = state.metrics.clone();
        let api_key = record.api_key.clone();
        let org = record.org.clone();
        let org_id = record.org_id.clone();
        let chain = record.chain.clone();

        let on_relay = move || {
            metrics.record_request(&api_key, &org, &org_id, &chain, "100");
        };

        if let Err(e) = pump(socket, &chain_route, &record.api_key, &client_ip, on_relay).await {
            tracing::warn!(error = %e, "websocket pump ended with an error");
        }
    })
}
