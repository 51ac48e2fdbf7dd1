//! Tier-2 routing against a live HTTP reasoning service (wiremock).

use meridian::agents::{FallbackError, FallbackRouter, IntentRouter};
use meridian::llm::{GenerationSettings, OpenAIClient};
use meridian::types::{HandlerId, ResolvedBy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

fn fallback(server: &MockServer, timeout: Duration) -> FallbackRouter {
    let client = OpenAIClient::new(
        None,
        format!("{}/v1", server.uri()),
        "llama3.2".to_string(),
        GenerationSettings {
            request_timeout: Duration::from_secs(5),
            ..GenerationSettings::default()
        },
    )
    .unwrap();
    let router = IntentRouter::with_defaults().unwrap();
    FallbackRouter::new(Arc::new(client), router.decomposer().clone(), timeout)
}

async fn serve(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(response)
        .expect(1)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_service_reply_becomes_fallback_decision() {
    let server = serve(ResponseTemplate::new(200).set_body_json(completion(
        r#"{"agent": "delay", "agents": ["delay", "forecasting"], "confidence": 0.75,
            "multiIntent": true,
            "subRequests": [{"text": "late shipments", "agent": "delay"},
                            {"text": "next quarter", "agent": "forecasting"}],
            "executionOrder": ["delay", "forecasting"]}"#,
    )))
    .await;

    let decision = fallback(&server, Duration::from_secs(2))
        .try_route("how are late shipments and next quarter looking", &[])
        .await
        .unwrap();

    assert_eq!(decision.resolved_by, ResolvedBy::Fallback);
    assert_eq!(decision.primary_handler, HandlerId::Delay);
    assert_eq!(decision.confidence, 0.75);
    assert_eq!(
        decision.execution_order,
        vec![HandlerId::Delay, HandlerId::Forecasting]
    );
    assert_eq!(decision.sub_requests.len(), 2);
    assert!(decision.check_invariants().is_ok());
}

#[tokio::test]
async fn test_prose_reply_is_malformed() {
    let server = serve(
        ResponseTemplate::new(200).set_body_json(completion("I would send this to delay.")),
    )
    .await;

    let err = fallback(&server, Duration::from_secs(2))
        .try_route("anything", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, FallbackError::Malformed(_)));
}

#[tokio::test]
async fn test_server_error_is_transport_failure() {
    let server = serve(ResponseTemplate::new(500).set_body_string("internal error")).await;

    let err = fallback(&server, Duration::from_secs(2))
        .try_route("anything", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, FallbackError::Transport(msg) if msg.contains("500")));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let server = serve(
        ResponseTemplate::new(200)
            .set_body_json(completion(r#"{"agent": "delay"}"#))
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let err = fallback(&server, Duration::from_millis(100))
        .try_route("anything", &[])
        .await
        .unwrap_err();

    assert_eq!(err, FallbackError::Timeout(100));
}

#[tokio::test]
async fn test_route_keeps_tier1_when_service_fails() {
    let server = serve(ResponseTemplate::new(503).set_body_string("overloaded")).await;
    let text = "tell me something interesting";
    let tier1 = IntentRouter::with_defaults().unwrap().score(text);

    let decision = fallback(&server, Duration::from_secs(2))
        .route(text, &[], &tier1)
        .await;

    assert_eq!(decision, tier1);
}
