//! HTTP contract tests against a wiremock server.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use questline_api::ApiClient;
use questline_core::api::{ConversationApi, SessionApi, SessionCommand};
use questline_types::{ApiError, Session, SessionSettings, SessionStatus};

async fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(server.uri())
}

#[tokio::test]
async fn test_start_parses_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/start"))
        .and(body_json(json!({"prompt": "a math adventure"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sessionId": "conv-1",
            "currentStage": "greeting",
            "progress": 0
        })))
        .mount(&server)
        .await;

    let started = client(&server)
        .await
        .start("a math adventure")
        .await
        .unwrap();
    assert_eq!(started.session_id, "conv-1");
    assert_eq!(started.first_stage, "greeting");
}

#[tokio::test]
async fn test_success_false_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "rate limited"
        })))
        .mount(&server)
        .await;

    let err = client(&server).await.start("hi").await.unwrap_err();
    match err {
        ApiError::Rejected { message, .. } => assert_eq!(message, "rate limited"),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_required_field_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "currentStage": "greeting"
        })))
        .mount(&server)
        .await;

    let err = client(&server).await.start("hi").await.unwrap_err();
    assert!(matches!(err, ApiError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_submit_input_returns_stage_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/conv-1/input"))
        .and(body_json(json!({"stage": "discovery", "text": "space pirates"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "progress": 25,
            "result": {"theme": "space pirates"},
            "response": "Great choice!"
        })))
        .mount(&server)
        .await;

    let result = client(&server)
        .await
        .submit_input("conv-1", "discovery", "space pirates")
        .await
        .unwrap();
    assert_eq!(result.stage, "discovery");
    assert_eq!(result.progress, 25);
    assert_eq!(result.result, json!({"theme": "space pirates"}));
    assert_eq!(result.response.as_deref(), Some("Great choice!"));
}

#[tokio::test]
async fn test_advance_returns_next_stage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/conv-1/advance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "currentStage": "requirements",
            "progress": 30
        })))
        .mount(&server)
        .await;

    let advance = client(&server).await.advance("conv-1").await.unwrap();
    assert_eq!(advance.to_stage, "requirements");
    assert_eq!(advance.progress, Some(30));
}

#[tokio::test]
async fn test_generate_parses_agent_roster() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/conversation/conv-1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "generationId": "gen-7",
            "agents": [
                {"id": "writer", "kind": "content"},
                {"id": "reviewer"}
            ],
            "projectId": "proj-3",
            "syncEndpoint": "https://sync.example/proj-3"
        })))
        .mount(&server)
        .await;

    let started = client(&server).await.generate("conv-1").await.unwrap();
    assert_eq!(started.generation_id, "gen-7");
    assert_eq!(started.agents.len(), 2);
    assert_eq!(started.agents[0].kind, "content");
    assert_eq!(started.agents[1].kind, "agent");
    assert_eq!(started.project_id.as_deref(), Some("proj-3"));
}

#[tokio::test]
async fn test_snapshot_returns_context() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/conversation/conv-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": "conv-1",
            "currentStage": "requirements",
            "progress": 30,
            "stageData": {"discovery": {"theme": "space pirates"}}
        })))
        .mount(&server)
        .await;

    let ctx = client(&server).await.snapshot("conv-1").await.unwrap();
    assert_eq!(ctx.current_stage, "requirements");
    assert_eq!(ctx.progress, 30);
    assert!(ctx.stage_data.contains_key("discovery"));
}

#[tokio::test]
async fn test_session_create_and_command() {
    let server = MockServer::start().await;
    let draft = Session::draft(SessionSettings::default(), json!({"map": "island"}));
    let mut confirmed = draft.clone();
    confirmed.id = "srv-1".to_string();
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&confirmed))
        .mount(&server)
        .await;
    let mut active = confirmed.clone();
    active.status = SessionStatus::Active;
    Mock::given(method("POST"))
        .and(path("/api/sessions/srv-1/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&active))
        .mount(&server)
        .await;

    let api = client(&server).await;
    let created = api.create(&draft).await.unwrap();
    assert_eq!(created.id, "srv-1");

    let started = api.command("srv-1", SessionCommand::Start).await.unwrap();
    assert_eq!(started.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_delete_and_list() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/sessions/srv-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let api = client(&server).await;
    api.delete("srv-1").await.unwrap();
    assert!(api.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_error_status_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions/srv-1/start"))
        .respond_with(ResponseTemplate::new(409).set_body_string("max players exceeded"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .command("srv-1", SessionCommand::Start)
        .await
        .unwrap_err();
    match err {
        ApiError::Rejected { status, message } => {
            assert_eq!(status, 409);
            assert_eq!(message, "max players exceeded");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}
