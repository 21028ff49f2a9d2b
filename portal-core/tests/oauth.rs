use std::time::Duration;

use portal_core::{OAuthClient, OAuthError};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn client_credentials_posts_form_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/tokens/OAuth/2"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-id"))
        .and(body_string_contains("client_secret=secret"))
        .and(body_string_contains("resource=00000003-0000-0ff1-ce00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": "3599",
            "access_token": "token",
            "resource": "00000003-0000-0ff1-ce00"
        })))
        .mount(&server)
        .await;

    let client =
        OAuthClient::with_base_url(&server.uri(), "tenant-1", "client-id", "secret").unwrap();
    let token = client
        .client_credentials("00000003-0000-0ff1-ce00")
        .await
        .unwrap();

    assert_eq!(token.access_token, "token");
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, Some(3599));
}

#[tokio::test]
async fn error_body_is_reported_as_denial() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/tokens/OAuth/2"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Invalid client secret is provided."
        })))
        .mount(&server)
        .await;

    let client =
        OAuthClient::with_base_url(&server.uri(), "tenant-1", "client-id", "wrong").unwrap();
    let err = client
        .client_credentials("resource")
        .await
        .expect_err("expected denial");

    match err {
        OAuthError::Denied(description) => {
            assert_eq!(description, "Invalid client secret is provided.")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_failure_keeps_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/tokens/OAuth/2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let client =
        OAuthClient::with_base_url(&server.uri(), "tenant-1", "client-id", "secret").unwrap();
    let err = client.client_credentials("resource").await.unwrap_err();

    assert!(matches!(err, OAuthError::Api { status, .. } if status.as_u16() == 503));
}

#[tokio::test]
async fn shared_http_client_timeout_applies_to_token_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/tokens/OAuth/2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token_type": "Bearer", "access_token": "late" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let http = reqwest::Client::builder()
        .read_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let client =
        OAuthClient::with_http(http, &server.uri(), "tenant-1", "client-id", "secret").unwrap();
    let result = client.client_credentials("resource").await;

    match result {
        Err(OAuthError::Request(err)) => assert!(err.is_timeout()),
        other => panic!("expected a timeout, got {other:?}"),
    }
}
