use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use relaygate_core::ChainRoute;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

const READ_WRITE_BUFFER: usize = 32 * 1024;
const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("no websocket upstream configured for chain")]
    NoUpstream,
    #[error("upstream dial failed: {0}")]
    Dial(String),
}

/// Relays frames bidirectionally between `client` and the tenant's
/// `ws_upstreams[0]`, one relayed message incrementing the caller-supplied
/// `on_relay` counter. Returns once either side closes or errors.
pub async fn pump(
    client: WebSocket,
    route: &ChainRoute,
    api_key: &str,
    x_forwarded_for: &str,
    mut on_relay: impl FnMut() + Send,
) -> Result<(), WsError> {
    let upstream_url = route.ws_upstream().ok_or(WsError::NoUpstream)?;

    let mut request = upstream_url
        .into_client_request()
        .map_err(|e| WsError::Dial(e.to_string()))?;
    request
        .headers_mut()
        .insert("API-Key", api_key.parse().map_err(|_| WsError::Dial("bad api key header".into()))?);
    request.headers_mut().insert(
        "X-Forwarded-For",
        x_forwarded_for
            .parse()
            .map_err(|_| WsError::Dial("bad xff header".into()))?,
    );

    let (upstream, _resp) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| WsError::Dial(e.to_string()))?;

    let (client_write, mut client_read) = client.split();
    let (mut upstream_write, mut upstream_read) = upstream.split();

    let client_write = Arc::new(Mutex::new(client_write));
    let done = tokio_util::sync::CancellationToken::new();

    let ping_write = client_write.clone();
    let ping_done = done.clone();
    let ping_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                _ = ping_done.cancelled() => return,
                _ = ticker.tick() => {
                    let mut w = ping_write.lock().await;
                    if w.send(AxumMessage::Ping(Vec::new().into())).await.is_err() {
                        ping_done.cancel();
                        return;
                    }
                }
            }
        }
    });

    // pump A: client -> upstream
    let a_done = done.clone();
    let pump_a = async {
        loop {
            tokio::select! {
                _ = a_done.cancelled() => break,
                msg = client_read.next() => {
                    match msg {
                        Some(Ok(frame)) => {
                            if upstream_write.send(to_upstream_message(frame)).await.is_err() {
                                a_done.cancel();
                                break;
                            }
                        }
                        _ => {
                            a_done.cancel();
                            break;
                        }
                    }
                }
            }
        }
    };

    // pump B: upstream -> client
    let b_done = done.clone();
    let relay_counter = &mut on_relay;
    let pump_b = async {
        loop {
            tokio::select! {
                _ = b_done.cancelled() => break,
                msg = upstream_read.next() => {
                    match msg {
                        Some(Ok(frame)) => {
                            let mut w = client_write.lock().await;
                            if w.send(to_client_message(frame)).await.is_err() {
                                b_done.cancel();
                                break;
                            }
                            drop(w);
                            relay_counter();
                        }
                        _ => {
                            b_done.cancel();
                            break;
                        }
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = pump_a => {},
        _ = pump_b => {},
    }

    done.cancel();
    let _ = ping_task.await;
    Ok(())
}

fn to_upstream_message(frame: AxumMessage) -> UpstreamMessage {
    match frame {
        AxumMessage::Text(t) => UpstreamMessage::Text(t.as_str().into()),
        AxumMessage::Binary(b) => UpstreamMessage::Binary(b),
        AxumMessage::Ping(p) => UpstreamMessage::Ping(p),
        AxumMessage::Pong(p) => UpstreamMessage::Pong(p),
        AxumMessage::Close(_) => UpstreamMessage::Close(None),
    }
}

fn to_client_message(frame: UpstreamMessage) -> AxumMessage {
    match frame {
        UpstreamMessage::Text(t) => AxumMessage::Text(t.as_str().into()),
        UpstreamMessage::Binary(b) => AxumMessage::Binary(b),
        UpstreamMessage::Ping(p) => AxumMessage::Ping(p),
        UpstreamMessage::Pong(p) => AxumMessage::Pong(p),
        UpstreamMessage::Close(_) | UpstreamMessage::Frame(_) => AxumMessage::Close(None),
    }
}
