use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_EVENT_SIZE: usize = 4 * 1024 * 1024;
const FORWARD_YIELD: Duration = Duration::from_millis(5);
const DROPPED_EVENT_MARKER: &str = ":No update available";
const READ_CHUNK: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum SseError {
    #[error("invalid target url: {0}")]
    InvalidUrl(String),
    #[error("upstream connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("upstream io error: {0}")]
    Io(#[source] std::io::Error),
}

/// A sink the SSE reader writes completed events to. Implemented over the
/// client's response body writer in production, and over an in-memory
/// buffer in tests.
#[async_trait::async_trait]
pub trait EventSink: Send {
    async fn write_event(&mut self, event: &[u8]) -> std::io::Result<()>;
}

/// Splits `target` (`http://host[:port]/path?query`) into the parts needed
/// for a raw TCP dial and a minimal request line.
pub fn split_target(target: &str) -> Result<(String, String), SseError> {
    let url = target
        .strip_prefix("http://")
        .ok_or_else(|| SseError::InvalidUrl(target.to_string()))?;
    let (host_port, path_and_query) = match url.find('/') {
        Some(idx) => (&url[..idx], &url[idx..]),
        None => (url, "/"),
    };
    Ok((host_port.to_string(), path_and_query.to_string()))
}

/// Opens a raw TCP connection to the upstream, writes a minimal HTTP/1.1
/// GET request, and discards the response headers. The caller should only
/// report success to its own client once this returns `Ok` — it's the
/// point at which the upstream has actually accepted the stream.
pub async fn connect_upstream(target: &str) -> Result<TcpStream, SseError> {
    let (host_port, path_and_query) = split_target(target)?;
    let addr = if host_port.contains(':') {
        host_port.clone()
    } else {
        format!("{host_port}:80")
    };

    let mut stream = TcpStream::connect(&addr).await.map_err(SseError::Connect)?;

    let request = format!(
        "GET {path_and_query} HTTP/1.1\r\nHost: {host_port}\r\nAccept: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.map_err(SseError::Io)?;

    discard_response_headers(&mut stream).await?;
    Ok(stream)
}

/// Dials the upstream and relays `\n\n`-delimited events to `sink` until it
/// closes, the client write fails, or cancellation fires. Equivalent to
/// [`connect_upstream`] followed by [`relay_events`]; kept for callers that
/// don't need to gate a response on the dial succeeding first.
pub async fn stream_sse(
    target: &str,
    sink: &mut impl EventSink,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<(), SseError> {
    let mut stream = connect_upstream(target).await?;
    relay_events(&mut stream, sink, cancel).await
}

async fn discard_response_headers(stream: &mut TcpStream) -> Result<(), SseError> {
    let mut seen = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.map_err(SseError::Io)?;
        if n == 0 {
            return Err(SseError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "upstream closed before headers completed",
            )));
        }
        seen.push(byte[0]);
        if seen.ends_with(b"\r\n\r\n") || seen.ends_with(b"\n\n") {
            return Ok(());
        }
    }
}

/// Byte-at-a-time scan for `\n\n` event boundaries, honouring the 4 MiB
/// per-event cap (overflow discarded, scan resumes at the next boundary)
/// and dropping events containing the upstream's "no update" sentinel.
pub async fn relay_events(
    stream: &mut TcpStream,
    sink: &mut impl EventSink,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<(), SseError> {
    let mut buf = Vec::new();
    let mut read_buf = [0u8; READ_CHUNK];
    let mut overflowed = false;

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = stream.read(&mut read_buf) => result.map_err(SseError::Io)?,
        };
        if n == 0 {
            return Ok(());
        }

        buf.extend_from_slice(&read_buf[..n]);

        while let Some(boundary) = find_boundary(&buf) {
            let event = buf[..boundary].to_vec();
            let rest = buf[boundary..].to_vec();
            buf = rest;

            if overflowed {
                overflowed = false;
                continue;
            }

            if !should_drop(&event) {
                sink.write_event(&event).await.map_err(SseError::Io)?;
                tokio::time::sleep(FORWARD_YIELD).await;
            }
        }

        if buf.len() > MAX_EVENT_SIZE {
            buf.clear();
            overflowed = true;
        }
    }
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

fn should_drop(event: &[u8]) -> bool {
    String::from_utf8_lossy(event).contains(DROPPED_EVENT_MARKER)
}
