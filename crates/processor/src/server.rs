//! HTTP authorization service for Envoy's `ext_authz` filter.
//!
//! Envoy is configured in HTTP service mode with `path_prefix: /check`, so the
//! original request target arrives as `/check<original path>`. A `200`
//! answer allows the request; `authorization` in the answer overwrites the
//! upstream header and `x-envoy-auth-headers-to-remove` lists headers Envoy
//! strips before forwarding. Any other status is returned to the client
//! as-is.

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use tokio::net::TcpListener;

use crate::router::{DirectionRouter, ProcessingRequest, ProcessingResponse};

/// Prefix Envoy prepends to the original path.
pub const CHECK_PREFIX: &str = "/check";

/// Header listing the headers Envoy must remove from the upstream request.
pub const HEADERS_TO_REMOVE: &str = "x-envoy-auth-headers-to-remove";

/// The authorization service.
pub struct Server {
    listen_addr: SocketAddr,
    processor: Arc<DirectionRouter>,
}

impl Server {
    pub fn new(listen_addr: SocketAddr, processor: Arc<DirectionRouter>) -> Self {
        Self { listen_addr, processor }
    }

    /// Builds the axum router.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.processor))
    }

    /// Serves until `shutdown` resolves, then drains in-flight checks.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "authorization service listening");
        axum::serve(listener, self.router()).with_graceful_shutdown(shutdown).await
    }
}

/// Builds the `/check` and `/health` routes around `processor`.
pub fn router(processor: Arc<DirectionRouter>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route(CHECK_PREFIX, any(handle_check))
        .route("/check/", any(handle_check))
        .route("/check/{*rest}", any(handle_check))
        .with_state(processor)
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_check(
    State(processor): State<Arc<DirectionRouter>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = original_path(&uri);
    let response = processor.process(&ProcessingRequest::new(path, headers)).await;
    into_check_response(response)
}

/// Recovers the original request target from the check request's URI.
#[must_use]
pub fn original_path(uri: &Uri) -> String {
    let target = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    let rest = target.strip_prefix(CHECK_PREFIX).unwrap_or(target);
    match rest {
        "" => "/".to_owned(),
        rest if rest.starts_with('?') => format!("/{rest}"),
        rest => rest.to_owned(),
    }
}

fn into_check_response(response: ProcessingResponse) -> Response {
    match response {
        ProcessingResponse::Continue { set_headers, remove_headers } => {
            let mut headers = HeaderMap::new();
            for (name, value) in set_headers {
                headers.insert(name, value);
            }
            if !remove_headers.is_empty() {
                let names = remove_headers.iter().map(|name| name.as_str()).collect::<Vec<_>>();
                // Header names are valid header values.
                if let Ok(value) = HeaderValue::from_str(&names.join(",")) {
                    headers.insert(HEADERS_TO_REMOVE, value);
                }
            }
            (StatusCode::OK, headers).into_response()
        },
        ProcessingResponse::ImmediateResponse { status, headers, body } => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            for (name, value) in headers {
                response.headers_mut().insert(name, value);
            }
            response
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("/check/api/data", "/api/data")]
    #[case("/check/api/data?page=2", "/api/data?page=2")]
    #[case("/check", "/")]
    #[case("/check/", "/")]
    #[case("/check/?x=1", "/?x=1")]
    #[case("/check?x=1", "/?x=1")]
    #[case("/check/.well-known/agent.json", "/.well-known/agent.json")]
    fn test_original_path(#[case] uri: &str, #[case] expected: &str) {
        assert_eq!(original_path(&uri.parse::<Uri>().unwrap()), expected);
    }

    #[test]
    fn test_continue_lists_removed_headers() {
        let response = into_check_response(ProcessingResponse::Continue {
            set_headers: Vec::new(),
            remove_headers: vec![axum::http::HeaderName::from_static("x-authbridge-direction")],
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADERS_TO_REMOVE], "x-authbridge-direction");
    }

    #[test]
    fn test_unmodified_sets_nothing() {
        let response = into_check_response(ProcessingResponse::unmodified());
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
    }

    #[test]
    fn test_rejection_carries_status_and_content_type() {
        let response = into_check_response(ProcessingResponse::unauthorized("issuer mismatch"));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}
