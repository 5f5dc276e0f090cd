//! Login handshake against a mock identity provider


use gpt_client::auth::{AuthEndpoints, AuthError, AuthStage, LoginHandshake};
use test_utils::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn handshake(server: &MockServer) -> LoginHandshake {
    LoginHandshake::new(AuthEndpoints::with_base(&server.uri()), None).expect("client")
}

#[tokio::test]
async fn test_full_login_returns_token_and_expiry() {
    let server = MockServer::start().await;
    mount_successful_login(&server).await;

    let token = handshake(&server)
        .run(EMAIL, PASSWORD)
        .await
        .expect("login succeeds");

    assert_eq!(token.token, ACCESS_TOKEN);
    assert_eq!(token.expires_at.to_rfc3339(), "2099-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_discovery_failure_reports_url_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/endpoint"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    match err {
        AuthError::Status { stage, url, status } => {
            assert_eq!(stage, AuthStage::StepOne);
            assert!(url.ends_with("/auth/endpoint"), "url {url}");
            assert_eq!(status, 503);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_authorize_without_redirect_reports_url_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/endpoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": STATE,
            "url": format!("{}/authorize?state={}", server.uri(), STATE),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    assert_eq!(err.stage(), Some(AuthStage::StepTwo));
    assert_eq!(err.status(), Some(200));
    assert!(err.url().unwrap().contains("/authorize"));
    assert!(!err.is_invalid_credentials());
}

#[tokio::test]
async fn test_redirect_with_foreign_state_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/endpoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": STATE,
            "url": format!("{}/authorize", server.uri()),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authorize"))
        .respond_with(redirect_to("/u/login/identifier?state=someone-else"))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    match err {
        AuthError::StateMismatch {
            expected, found, ..
        } => {
            assert_eq!(expected, STATE);
            assert_eq!(found, "someone-else");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_identifier_is_invalid_credentials() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/u/login/identifier"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    assert!(err.is_invalid_credentials(), "got {err:?}");
    assert!(err.to_string().contains("email and password combination is incorrect"));
}

#[tokio::test]
async fn test_rejected_password_is_invalid_credentials() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/u/login/identifier"))
        .respond_with(redirect_to(&format!("/u/login/password?state={STATE}")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/login/password"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, "wrong").await.unwrap_err();

    assert!(err.is_invalid_credentials(), "got {err:?}");
    assert!(err.url().unwrap().contains("/u/login/password"));
}

#[tokio::test]
async fn test_password_post_server_error_is_a_status_error() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/u/login/identifier"))
        .respond_with(redirect_to(&format!("/u/login/password?state={STATE}")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/login/password"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    match err {
        AuthError::Status { stage, url, status } => {
            assert_eq!(stage, AuthStage::StepTwo);
            assert!(url.contains("/u/login/password"), "url {url}");
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_identifier_post_without_cookie_is_not_matched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/endpoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": STATE,
            "url": format!("{}/authorize", server.uri()),
        })))
        .mount(&server)
        .await;
    // No Set-Cookie here, so the cookie-guarded identifier mock never answers.
    Mock::given(method("GET"))
        .and(path("/authorize"))
        .respond_with(redirect_to(&format!("/u/login/identifier?state={STATE}")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/login/identifier"))
        .and(wiremock::matchers::header("cookie", "did=abc123"))
        .respond_with(redirect_to(&format!("/u/login/password?state={STATE}")))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_token_endpoint_detail_is_a_step_three_error() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/u/login/identifier"))
        .respond_with(redirect_to(&format!("/u/login/password?state={STATE}")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/login/password"))
        .respond_with(redirect_to(&format!(
            "{}/api/auth/callback/auth0?code=c&state={}",
            server.uri(),
            STATE
        )))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"detail": "account suspended"})),
        )
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    match err {
        AuthError::Protocol { stage, message } => {
            assert_eq!(stage, AuthStage::StepThree);
            assert_eq!(message, "account suspended");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_endless_redirects_are_cut_off() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/u/login/identifier"))
        .respond_with(redirect_to(&format!("/u/login/password?state={STATE}")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/u/login/password"))
        .respond_with(redirect_to("/loop"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(redirect_to("/loop"))
        .mount(&server)
        .await;

    let err = handshake(&server).run(EMAIL, PASSWORD).await.unwrap_err();

    assert!(
        matches!(err, AuthError::Protocol { stage: AuthStage::StepTwo, ref message } if message.contains("no authorization code")),
        "got {err:?}"
    );
}
