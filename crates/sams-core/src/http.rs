//! Blocking HTTP transport over a shared async client.
//!
//! Uses async reqwest on a shared tokio runtime, but presents a sync interface
//! so partition workers can stay on plain threads.

use std::sync::LazyLock;
use std::time::Duration;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout unless the caller configures one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A JSON request. The body is sent even for GET; the upstream API expects it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure (no HTTP status was obtained, or the body could not be read)
#[derive(Debug)]
pub enum TransportError {
    /// Connect or read timeout
    Timeout(String),
    /// Connection refused / reset / DNS
    Connect(String),
    /// Body could not be decoded (truncated chunked transfer, bad encoding)
    Decode(String),
    Other(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(m) => write!(f, "timeout: {m}"),
            Self::Connect(m) => write!(f, "connection error: {m}"),
            Self::Decode(m) => write!(f, "body decode error: {m}"),
            Self::Other(m) => write!(f, "transport error: {m}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Classify a reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_timeout() {
            Self::Timeout(message)
        } else if e.is_decode() || e.is_body() {
            Self::Decode(message)
        } else if e.is_connect() {
            Self::Connect(message)
        } else {
            Self::Other(message)
        }
    }

    /// Failures that warrant a forced token refresh and a single resend.
    ///
    /// A stalled or truncated response is what a silently revoked token looks like upstream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Decode(_))
    }
}

/// Seam between the API layer and the network.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// [`Transport`] backed by the shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        SHARED_RUNTIME.handle().block_on(async {
            let builder = match request.method {
                Method::Get => http_client().get(&request.url),
                Method::Post => http_client().post(&request.url),
            };
            let mut builder = builder.timeout(self.timeout).json(&request.body);
            if let Some(value) = &request.authorization {
                builder = builder.header(reqwest::header::AUTHORIZATION, value);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::from_reqwest(&e))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::from_reqwest(&e))?;
            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_decode_are_recoverable() {
        assert!(TransportError::Timeout("t".into()).is_recoverable());
        assert!(TransportError::Decode("d".into()).is_recoverable());
    }

    #[test]
    fn connect_and_other_not_recoverable() {
        assert!(!TransportError::Connect("refused".into()).is_recoverable());
        assert!(!TransportError::Other("x".into()).is_recoverable());
    }

    #[test]
    fn display_names_kind() {
        let err = TransportError::Timeout("read stalled".into());
        assert_eq!(format!("{err}"), "timeout: read stalled");
        let err = TransportError::Decode("chunk".into());
        assert!(format!("{err}").contains("decode"));
    }

    #[test]
    fn connection_refused_is_connect_error() {
        // Port 9 (discard) on localhost is closed on any sane test host
        let transport = HttpTransport::new(Duration::from_secs(5));
        let request = HttpRequest {
            method: Method::Get,
            url: "http://127.0.0.1:9/".to_string(),
            authorization: None,
            body: serde_json::json!({}),
        };
        let err = transport.send(&request).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect(_) | TransportError::Other(_)
        ));
    }
}
