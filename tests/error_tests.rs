// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chatbridge::error::ProxyError;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        ProxyError::Unauthorized("missing key".to_string()),
        ProxyError::ModelNotAccessible("gpt-9".to_string()),
        ProxyError::Upstream("API error".to_string()),
        ProxyError::Storage("disk full".to_string()),
        ProxyError::InvalidRequest("Bad request".to_string()),
        ProxyError::Socket("closed".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_invalid_request_error() {
    let error = ProxyError::InvalidRequest("Missing model field".to_string());
    assert!(format!("{}", error).contains("Missing model field"));
}

#[test]
fn test_unauthorized_maps_to_401() {
    let response = ProxyError::Unauthorized("bad key".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_unknown_model_maps_to_404() {
    let response = ProxyError::ModelNotAccessible("gpt-9".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_upstream_maps_to_502() {
    let response = ProxyError::Upstream("Connection refused".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_error_body_is_openai_shaped() {
    let response = ProxyError::ModelNotAccessible("gpt-9".to_string()).into_response();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["code"], "model_not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("gpt-9"));
}

#[test]
fn test_content_policy_violation_carries_text() {
    let error = ProxyError::ContentPolicyViolation("I can't draw that.".to_string());
    assert_eq!(error.to_string(), "I can't draw that.");
    assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
}
