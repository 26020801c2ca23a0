//! Bearer token lifecycle.
//!
//! One process-wide token, fetched lazily and refreshed on the first use after
//! the TTL elapses. Refresh happens under a mutex so concurrent workers wait for
//! a single exchange instead of racing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sams_core::{HttpRequest, Method, Transport};

use crate::error::AuthError;

pub const TOKEN_TTL: Duration = Duration::from_secs(1800);

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests and dry runs
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Jump to `secs` seconds after creation
    pub fn set_secs(&self, secs: u64) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = Duration::from_secs(secs);
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

struct CachedToken {
    value: String,
    issued_at: Instant,
}

pub struct TokenManager {
    auth_url: String,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    current: Mutex<Option<CachedToken>>,
    exchanges: AtomicUsize,
}

impl TokenManager {
    pub fn new(
        auth_url: impl Into<String>,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            credentials,
            transport,
            clock,
            ttl: TOKEN_TTL,
            current: Mutex::new(None),
            exchanges: AtomicUsize::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `Authorization` header value, refreshing the token if it is missing or stale
    pub fn auth_header(&self) -> Result<String, AuthError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let fresh = current
            .as_ref()
            .is_some_and(|t| now.saturating_duration_since(t.issued_at) <= self.ttl);
        if !fresh {
            let value = self.exchange()?;
            *current = Some(CachedToken {
                value,
                issued_at: now,
            });
        }
        match current.as_ref() {
            Some(token) => Ok(format!("Bearer {}", token.value)),
            None => Err(AuthError::MissingToken),
        }
    }

    /// Drop the cached token and fetch a new one now
    pub fn force_refresh(&self) -> Result<(), AuthError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = None;
        let value = self.exchange()?;
        *current = Some(CachedToken {
            value,
            issued_at: self.clock.now(),
        });
        Ok(())
    }

    /// Credential exchanges performed so far
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::Relaxed)
    }

    fn exchange(&self) -> Result<String, AuthError> {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        log::debug!("Requesting API token from {}", self.auth_url);

        let request = HttpRequest {
            method: Method::Post,
            url: self.auth_url.clone(),
            authorization: None,
            body: serde_json::json!({
                "username": self.credentials.username,
                "password": self.credentials.password,
            }),
        };
        let response = self
            .transport
            .send(&request)
            .map_err(AuthError::Transport)?;
        if response.status != 200 {
            return Err(AuthError::Status(response.status));
        }

        let body: serde_json::Value =
            serde_json::from_str(&response.body).map_err(|_| AuthError::MissingToken)?;
        match body.get("Token_No") {
            Some(serde_json::Value::String(token)) if !token.is_empty() => Ok(token.clone()),
            _ => Err(AuthError::MissingToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sams_core::{HttpResponse, TransportError};

    /// Issues token-1, token-2, ... and counts calls
    struct TokenIssuer {
        calls: AtomicUsize,
        status: u16,
    }

    impl TokenIssuer {
        fn new(status: u16) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status,
            }
        }
    }

    impl Transport for TokenIssuer {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            assert_eq!(request.method, Method::Post);
            assert_eq!(request.body["username"], "user");
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HttpResponse {
                status: self.status,
                body: format!(r#"{{"Token_No":"token-{n}"}}"#),
            })
        }
    }

    fn manager(issuer: Arc<TokenIssuer>, clock: Arc<ManualClock>) -> TokenManager {
        TokenManager::new(
            "http://sams.test/getDPICtoken",
            Credentials {
                username: "user".into(),
                password: "secret".into(),
            },
            issuer,
            clock,
        )
    }

    #[test]
    fn refresh_after_ttl() {
        let issuer = Arc::new(TokenIssuer::new(200));
        let clock = Arc::new(ManualClock::new());
        let tokens = manager(issuer.clone(), clock.clone());

        assert_eq!(tokens.auth_header().unwrap(), "Bearer token-1");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        clock.set_secs(1799);
        assert_eq!(tokens.auth_header().unwrap(), "Bearer token-1");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        clock.set_secs(1801);
        assert_eq!(tokens.auth_header().unwrap(), "Bearer token-2");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tokens.exchanges(), 2);
    }

    #[test]
    fn force_refresh_replaces_token() {
        let issuer = Arc::new(TokenIssuer::new(200));
        let clock = Arc::new(ManualClock::new());
        let tokens = manager(issuer.clone(), clock);

        tokens.auth_header().unwrap();
        tokens.force_refresh().unwrap();
        assert_eq!(tokens.auth_header().unwrap(), "Bearer token-2");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_200_is_auth_error() {
        let issuer = Arc::new(TokenIssuer::new(401));
        let tokens = manager(issuer, Arc::new(ManualClock::new()));
        assert!(matches!(tokens.auth_header(), Err(AuthError::Status(401))));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn concurrent_readers_share_one_exchange() {
        let issuer = Arc::new(TokenIssuer::new(200));
        let tokens = manager(issuer.clone(), Arc::new(ManualClock::new()));
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| tokens.auth_header().unwrap());
            }
        });
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }
}
