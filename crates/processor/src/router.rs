//! Per-request direction routing.
//!
//! The proxy calls the processor once per request. The [`DirectionRouter`]
//! decides the traffic direction from the marker header, applies the bypass
//! list, runs the inbound validator or the outbound exchanger, and turns
//! the verdict into an instruction for the proxy.
//!
//! ```text
//! request ─► bypass? ──yes──► Continue (unmodified)
//!               │no
//!               ├─ marker present ─► InboundValidator ─► Continue (strip marker) | 401
//!               └─ marker absent  ─► TokenExchanger   ─► Continue (new Authorization) | Continue
//! ```
//!
//! Sessions are bounded by a deadline. A session that overruns it, or whose
//! processing panics, degrades to a generic rejection inbound and to a
//! passthrough outbound.

use std::{fmt, panic::AssertUnwindSafe, time::Duration};

use authbridge_authn::AuthError;
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, ToStrError},
};
use futures::FutureExt;
use tracing::Instrument;

use crate::{
    bypass::BypassMatcher,
    inbound::{InboundDecision, InboundValidator},
    outbound::{OutboundDecision, TokenExchanger},
};

/// Header set by the inbound listener; its presence marks inbound traffic.
pub const DIRECTION_HEADER: &str = "x-authbridge-direction";

/// Default deadline for one processing session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Reason returned when inbound processing fails internally.
pub const INTERNAL_REJECTION: &str = "authentication unavailable";

/// Traffic direction of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Arriving at the workload.
    Inbound,
    /// Leaving the workload.
    Outbound,
}

impl Direction {
    /// Classifies a request by the presence of [`DIRECTION_HEADER`].
    #[must_use]
    pub fn of(headers: &HeaderMap) -> Self {
        if headers.contains_key(DIRECTION_HEADER) { Self::Inbound } else { Self::Outbound }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// The request attributes the processor looks at.
#[derive(Debug, Clone, Default)]
pub struct ProcessingRequest {
    /// Request target, possibly including a query string.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
}

impl ProcessingRequest {
    /// Creates a request from its path and headers.
    #[must_use]
    pub fn new(path: impl Into<String>, headers: HeaderMap) -> Self {
        Self { path: path.into(), headers }
    }

    /// The `Authorization` value; `Some(Err(_))` if present but not valid UTF-8.
    fn authorization(&self) -> Option<Result<&str, ToStrError>> {
        self.headers.get(AUTHORIZATION).map(HeaderValue::to_str)
    }
}

/// Instruction returned to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResponse {
    /// Forward the request after applying the header mutations.
    Continue {
        /// Headers to add or overwrite.
        set_headers: Vec<(HeaderName, HeaderValue)>,
        /// Headers to remove.
        remove_headers: Vec<HeaderName>,
    },
    /// Answer the client directly; the request is not forwarded.
    ImmediateResponse {
        /// Response status.
        status: StatusCode,
        /// Response headers.
        headers: Vec<(HeaderName, HeaderValue)>,
        /// Response body.
        body: String,
    },
}

impl ProcessingResponse {
    /// Forward the request unchanged.
    #[must_use]
    pub fn unmodified() -> Self {
        Self::Continue { set_headers: Vec::new(), remove_headers: Vec::new() }
    }

    /// A 401 answer with the JSON rejection body.
    #[must_use]
    pub fn unauthorized(reason: &str) -> Self {
        let body = serde_json::json!({ "error": "unauthorized", "message": reason }).to_string();
        Self::ImmediateResponse {
            status: StatusCode::UNAUTHORIZED,
            headers: vec![(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        }
    }
}

/// Entry point for every processing session.
#[derive(bon::Builder)]
pub struct DirectionRouter {
    #[builder(default = BypassMatcher::default_patterns())]
    bypass: BypassMatcher,
    inbound: InboundValidator,
    outbound: TokenExchanger,
    #[builder(default = DEFAULT_SESSION_TIMEOUT)]
    session_timeout: Duration,
}

impl DirectionRouter {
    /// Processes one request.
    ///
    /// Never fails: internal errors, panics and deadline overruns degrade to
    /// [`INTERNAL_REJECTION`] inbound and to an unmodified request outbound.
    pub async fn process(&self, request: &ProcessingRequest) -> ProcessingResponse {
        let direction = Direction::of(&request.headers);
        let span = tracing::info_span!("session", %direction, path = %request.path);

        async {
            if self.bypass.matches(&request.path) {
                tracing::debug!("path bypasses authentication");
                return ProcessingResponse::unmodified();
            }

            let session = AssertUnwindSafe(self.dispatch(direction, request)).catch_unwind();
            match tokio::time::timeout(self.session_timeout, session).await {
                Ok(Ok(response)) => response,
                Ok(Err(_panic)) => {
                    tracing::error!("session panicked, degrading");
                    Self::degraded(direction)
                },
                Err(_elapsed) => {
                    tracing::warn!(timeout = ?self.session_timeout, "session deadline exceeded, degrading");
                    Self::degraded(direction)
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, direction: Direction, request: &ProcessingRequest) -> ProcessingResponse {
        match direction {
            Direction::Inbound => {
                let authorization = match request.authorization().transpose() {
                    Ok(authorization) => authorization,
                    Err(err) => {
                        let err = AuthError::invalid_token_format(format!(
                            "Authorization header is not valid UTF-8: {err}"
                        ));
                        tracing::info!(error = %err, "inbound token rejected");
                        return ProcessingResponse::unauthorized(&format!(
                            "token validation failed: {err}"
                        ));
                    },
                };
                self.inbound_decision(authorization).await
            },
            Direction::Outbound => {
                // An undecodable credential cannot be exchanged; forward it untouched.
                let authorization = request.authorization().and_then(Result::ok);
                self.outbound_decision(authorization).await
            },
        }
    }

    async fn inbound_decision(&self, authorization: Option<&str>) -> ProcessingResponse {
        match self.inbound.validate(authorization).await {
            InboundDecision::Accepted(_claims) => ProcessingResponse::Continue {
                set_headers: Vec::new(),
                remove_headers: vec![HeaderName::from_static(DIRECTION_HEADER)],
            },
            InboundDecision::Rejected(reason) => ProcessingResponse::unauthorized(&reason),
        }
    }

    async fn outbound_decision(&self, authorization: Option<&str>) -> ProcessingResponse {
        match self.outbound.process(authorization).await {
            OutboundDecision::Exchanged { authorization } => {
                match HeaderValue::from_str(&authorization) {
                    Ok(value) => ProcessingResponse::Continue {
                        set_headers: vec![(AUTHORIZATION, value)],
                        remove_headers: Vec::new(),
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "exchanged token is not a valid header value");
                        ProcessingResponse::unmodified()
                    },
                }
            },
            OutboundDecision::PassedThrough(reason) => {
                tracing::debug!(reason, "outbound request passed through");
                ProcessingResponse::unmodified()
            },
        }
    }

    fn degraded(direction: Direction) -> ProcessingResponse {
        match direction {
            Direction::Inbound => ProcessingResponse::unauthorized(INTERNAL_REJECTION),
            Direction::Outbound => ProcessingResponse::unmodified(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use authbridge_authn::{
        KeySetSource, MemoryKeySetSource, SigningKeyCache, testutil::TestKeyPair,
    };

    use super::*;
    use crate::credentials::{CredentialStore, Credentials};

    const ISSUER: &str = "http://keycloak:8080/realms/demo";

    struct Fixture {
        key: TestKeyPair,
        source: Arc<MemoryKeySetSource>,
        router: DirectionRouter,
    }

    fn fixture(session_timeout: Duration) -> Fixture {
        let key = TestKeyPair::generate("kid-a");
        let source = Arc::new(MemoryKeySetSource::with_keys([key.jwk()]));
        let store = Arc::new(CredentialStore::new(
            Credentials::builder().client_secret("").issuer(ISSUER).build(),
        ));
        let key_cache =
            Arc::new(SigningKeyCache::new(Arc::clone(&source) as Arc<dyn KeySetSource>));

        let router = DirectionRouter::builder()
            .inbound(InboundValidator::builder().store(Arc::clone(&store)).key_cache(key_cache).build())
            .outbound(TokenExchanger::builder().store(store).build())
            .session_timeout(session_timeout)
            .build();
        Fixture { key, source, router }
    }

    fn inbound(path: &str, authorization: Option<&str>) -> ProcessingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(DIRECTION_HEADER, HeaderValue::from_static("inbound"));
        if let Some(authorization) = authorization {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        }
        ProcessingRequest::new(path, headers)
    }

    fn rejection_message(response: &ProcessingResponse) -> String {
        let ProcessingResponse::ImmediateResponse { status, body, .. } = response else {
            panic!("expected immediate response, got {response:?}");
        };
        assert_eq!(*status, StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["error"], "unauthorized");
        body["message"].as_str().unwrap().to_owned()
    }

    #[test]
    fn test_direction_from_marker() {
        assert_eq!(Direction::of(&inbound("/", None).headers), Direction::Inbound);
        assert_eq!(Direction::of(&HeaderMap::new()), Direction::Outbound);
    }

    #[tokio::test]
    async fn test_inbound_accept_strips_marker() {
        let f = fixture(DEFAULT_SESSION_TIMEOUT);
        let header = format!("Bearer {}", f.key.sign_token(ISSUER, None));

        let response = f.router.process(&inbound("/api/data", Some(&header))).await;

        assert_eq!(
            response,
            ProcessingResponse::Continue {
                set_headers: Vec::new(),
                remove_headers: vec![HeaderName::from_static(DIRECTION_HEADER)],
            }
        );
    }

    #[tokio::test]
    async fn test_inbound_reject_is_json_401() {
        let f = fixture(DEFAULT_SESSION_TIMEOUT);
        let response = f.router.process(&inbound("/api/data", None)).await;
        assert_eq!(rejection_message(&response), "missing Authorization header");
    }

    #[tokio::test]
    async fn test_non_utf8_authorization_fails_validation() {
        let f = fixture(DEFAULT_SESSION_TIMEOUT);
        let mut request = inbound("/api/data", None);
        request.headers.insert(AUTHORIZATION, HeaderValue::from_bytes(b"Bearer \xffabc").unwrap());

        let message = rejection_message(&f.router.process(&request).await);
        assert!(message.starts_with("token validation failed: "), "{message}");
        assert_eq!(f.source.fetch_count(), 0);

        request.headers.remove(DIRECTION_HEADER);
        assert_eq!(f.router.process(&request).await, ProcessingResponse::unmodified());
    }

    #[tokio::test]
    async fn test_bypass_applies_to_both_directions() {
        let f = fixture(DEFAULT_SESSION_TIMEOUT);

        let response = f.router.process(&inbound("/.well-known/agent.json", None)).await;
        assert_eq!(response, ProcessingResponse::unmodified());

        let outbound = ProcessingRequest::new("/healthz", HeaderMap::new());
        assert_eq!(f.router.process(&outbound).await, ProcessingResponse::unmodified());
    }

    #[tokio::test]
    async fn test_outbound_incomplete_config_is_unmodified() {
        let f = fixture(DEFAULT_SESSION_TIMEOUT);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller-token"));

        let response = f.router.process(&ProcessingRequest::new("/v1/tasks", headers)).await;
        assert_eq!(response, ProcessingResponse::unmodified());
    }

    #[tokio::test]
    async fn test_deadline_overrun_degrades_to_generic_401() {
        let f = fixture(Duration::from_millis(50));
        f.source.set_delay(Some(Duration::from_secs(2)));
        let header = format!("Bearer {}", f.key.sign_token(ISSUER, None));

        let response = f.router.process(&inbound("/api/data", Some(&header))).await;
        assert_eq!(rejection_message(&response), INTERNAL_REJECTION);
    }

    #[tokio::test]
    async fn test_overrun_session_releases_key_refresh() {
        let f = fixture(Duration::from_millis(50));
        f.source.set_delay(Some(Duration::from_secs(2)));
        let header = format!("Bearer {}", f.key.sign_token(ISSUER, None));
        f.router.process(&inbound("/api/data", Some(&header))).await;

        f.source.set_delay(None);
        let response = f.router.process(&inbound("/api/data", Some(&header))).await;
        assert!(matches!(response, ProcessingResponse::Continue { .. }), "{response:?}");
    }
}
