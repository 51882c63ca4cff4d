#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
//! Fault injection through the processor's fail points.
//!
//! ```bash
//! cargo test -p authbridge-processor --features failpoints --test failpoint_tests
//! ```

use std::{sync::Arc, time::Duration};

use authbridge_authn::{
    SigningKeyCache,
    key_source::{KeySetSource, MemoryKeySetSource},
    testutil::TestKeyPair,
};
use authbridge_processor::{
    CredentialStore, Credentials, DIRECTION_HEADER, DirectionRouter, InboundValidator,
    ProcessingRequest, ProcessingResponse, TokenExchanger,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::AUTHORIZATION};
use serde_json::json;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

const ISSUER: &str = "http://keycloak:8080/realms/demo";

fn processor(token_endpoint: String, key: &TestKeyPair) -> DirectionRouter {
    let store = Arc::new(CredentialStore::new(
        Credentials::builder()
            .client_id("orders-agent")
            .client_secret("s3cret")
            .token_endpoint(token_endpoint)
            .issuer(ISSUER)
            .target_audience("inventory")
            .build(),
    ));
    let source = Arc::new(MemoryKeySetSource::with_keys([key.jwk()]));
    let key_cache = Arc::new(SigningKeyCache::new(source as Arc<dyn KeySetSource>));

    DirectionRouter::builder()
        .inbound(InboundValidator::builder().store(Arc::clone(&store)).key_cache(key_cache).build())
        .outbound(TokenExchanger::builder().store(store).timeout(Duration::from_secs(2)).build())
        .build()
}

fn request(inbound: bool, authorization: &str) -> ProcessingRequest {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
    if inbound {
        headers.insert(DIRECTION_HEADER, HeaderValue::from_static("inbound"));
    }
    ProcessingRequest::new("/api/data", headers)
}

#[tokio::test]
async fn exchange_failpoint_passes_original_token_through() {
    let scenario = fail::FailScenario::setup();
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "new"})))
        .expect(0)
        .mount(&idp)
        .await;
    let key = TestKeyPair::generate("kid-a");
    let processor = processor(format!("{}/token", idp.uri()), &key);

    fail::cfg("token-exchange-before-send", "return").expect("failed to configure fail point");

    let response = processor.process(&request(false, "Bearer caller-token")).await;
    assert_eq!(response, ProcessingResponse::unmodified());

    scenario.teardown();
}

#[tokio::test]
async fn key_fetch_failpoint_rejects_inbound() {
    let scenario = fail::FailScenario::setup();
    let key = TestKeyPair::generate("kid-a");
    let processor = processor("http://127.0.0.1:9/token".to_owned(), &key);
    let authorization = format!("Bearer {}", key.sign_token(ISSUER, None));

    fail::cfg("key-set-before-fetch", "return").expect("failed to configure fail point");
    let ProcessingResponse::ImmediateResponse { status, .. } =
        processor.process(&request(true, &authorization)).await
    else {
        panic!("expected rejection while key fetch fails");
    };
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    fail::remove("key-set-before-fetch");
    let response = processor.process(&request(true, &authorization)).await;
    assert!(matches!(response, ProcessingResponse::Continue { .. }), "{response:?}");

    scenario.teardown();
}
