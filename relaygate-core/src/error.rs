use thiserror::Error;

/// Unified error type spanning the store, cache, router, and forwarder layers.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("missing or malformed route")]
    BadRoute,

    #[error("unknown api key")]
    UnauthorizedKey,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("dispatch deadline exceeded")]
    DeadlineExceeded,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map to the HTTP status code returned to the client.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::BadRoute => 403,
            GatewayError::UnauthorizedKey => 403,
            GatewayError::QuotaExceeded => 429,
            GatewayError::UnknownChain(_) => 400,
            GatewayError::UpstreamUnavailable(_) => 502,
            GatewayError::ClientDisconnected => 408,
            GatewayError::DeadlineExceeded => 504,
            GatewayError::Store(StoreError::NotFound) => 403,
            GatewayError::Store(StoreError::Transient(_)) => 500,
            GatewayError::Config(_) => 500,
            GatewayError::Io(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Plain-text body sent to the client — no internals leak, no JSON wrapping.
    pub fn to_body(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

/// Errors surfaced by a `MetadataStore` implementation.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("transient store error: {0}")]
    Transient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::BadRoute.status_code(), 403);
        assert_eq!(GatewayError::UnauthorizedKey.status_code(), 403);
        assert_eq!(GatewayError::QuotaExceeded.status_code(), 429);
        assert_eq!(GatewayError::UnknownChain("x".into()).status_code(), 400);
        assert_eq!(GatewayError::UpstreamUnavailable("x".into()).status_code(), 502);
        assert_eq!(GatewayError::ClientDisconnected.status_code(), 408);
        assert_eq!(GatewayError::DeadlineExceeded.status_code(), 504);
        assert_eq!(GatewayError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_store_error_mapping() {
        let not_found: GatewayError = StoreError::NotFound.into();
        assert_eq!(not_found.status_code(), 403);

        let transient: GatewayError = StoreError::Transient("connection reset".into()).into();
        assert_eq!(transient.status_code(), 500);
    }

    #[test]
    fn test_body_is_plain_text_not_json() {
        let err = GatewayError::QuotaExceeded;
        let body = String::from_utf8(err.to_body()).unwrap();
        assert_eq!(body, "quota exceeded");
        assert!(!body.starts_with('{'));
    }

    #[test]
    fn test_unknown_chain_message_contains_name() {
        let err = GatewayError::UnknownChain("thorchain".into());
        assert!(err.to_string().contains("thorchain"));
    }
}
