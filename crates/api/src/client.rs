// crates/api/src/client.rs
//! reqwest-backed implementations of [`ConversationApi`] and
//! [`SessionApi`].
//!
//! Response shapes are validated once here; callers only ever see typed
//! values or an [`ApiError`]. Semantic rejections (`success: false`,
//! non-2xx) are surfaced and never retried.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use questline_core::api::{
    AgentSeed, ConversationApi, SessionApi, SessionCommand, StageAdvance, StageResult,
    StartedConversation, StartedGeneration,
};
use questline_types::{ApiError, ConversationContext, Session};

const DEFAULT_BASE_URL: &str = "http://localhost:3001";

/// Envelope returned by the conversation endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    success: bool,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateEnvelope {
    success: bool,
    #[serde(default)]
    generation_id: Option<String>,
    #[serde(default)]
    agents: Vec<AgentSeedPayload>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    sync_endpoint: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentSeedPayload {
    id: String,
    #[serde(default)]
    kind: Option<String>,
}

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// QUESTLINE_API_URL env var, falling back to the local dev server.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("QUESTLINE_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, ApiError> {
        debug!(path, "POST");
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(resp).await
    }

    async fn post_envelope(&self, path: &str, body: &Value) -> Result<Envelope, ApiError> {
        let envelope: Envelope = self
            .post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::malformed(e.to_string()))?;
        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(ApiError::rejected(200, message));
        }
        Ok(envelope)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!(path, "GET");
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::malformed(e.to_string()))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::rejected(status.as_u16(), message))
}

/// Pull a required field out of an envelope, treating absence as a
/// malformed response.
fn require<T>(field: Option<T>, name: &str) -> Result<T, ApiError> {
    field.ok_or_else(|| ApiError::malformed(format!("envelope missing {name}")))
}

#[async_trait]
impl ConversationApi for ApiClient {
    async fn start(&self, initial_prompt: &str) -> Result<StartedConversation, ApiError> {
        let envelope = self
            .post_envelope(
                "/api/conversation/start",
                &json!({ "prompt": initial_prompt }),
            )
            .await?;
        Ok(StartedConversation {
            session_id: require(envelope.session_id, "sessionId")?,
            first_stage: require(envelope.current_stage, "currentStage")?,
        })
    }

    async fn submit_input(
        &self,
        session_id: &str,
        stage: &str,
        text: &str,
    ) -> Result<StageResult, ApiError> {
        let envelope = self
            .post_envelope(
                &format!("/api/conversation/{session_id}/input"),
                &json!({ "stage": stage, "text": text }),
            )
            .await?;
        Ok(StageResult {
            stage: stage.to_string(),
            result: envelope.result.unwrap_or(Value::Null),
            progress: require(envelope.progress, "progress")?,
            response: envelope.response,
        })
    }

    async fn advance(&self, session_id: &str) -> Result<StageAdvance, ApiError> {
        let envelope = self
            .post_envelope(
                &format!("/api/conversation/{session_id}/advance"),
                &json!({}),
            )
            .await?;
        Ok(StageAdvance {
            to_stage: require(envelope.current_stage, "currentStage")?,
            progress: envelope.progress,
        })
    }

    async fn generate(&self, session_id: &str) -> Result<StartedGeneration, ApiError> {
        let envelope: GenerateEnvelope = self
            .post(
                &format!("/api/conversation/{session_id}/generate"),
                &json!({}),
            )
            .await?
            .json()
            .await
            .map_err(|e| ApiError::malformed(e.to_string()))?;
        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "generation rejected".to_string());
            return Err(ApiError::rejected(200, message));
        }
        Ok(StartedGeneration {
            generation_id: require(envelope.generation_id, "generationId")?,
            agents: envelope
                .agents
                .into_iter()
                .map(|a| AgentSeed {
                    id: a.id,
                    kind: a.kind.unwrap_or_else(|| "agent".to_string()),
                })
                .collect(),
            project_id: envelope.project_id,
            sync_endpoint: envelope.sync_endpoint,
        })
    }

    async fn snapshot(&self, session_id: &str) -> Result<ConversationContext, ApiError> {
        self.get_json(&format!("/api/conversation/{session_id}"))
            .await
    }
}

#[async_trait]
impl SessionApi for ApiClient {
    async fn create(&self, draft: &Session) -> Result<Session, ApiError> {
        let body = serde_json::to_value(draft).map_err(|e| ApiError::malformed(e.to_string()))?;
        self.post("/api/sessions", &body)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::malformed(e.to_string()))
    }

    async fn command(
        &self,
        session_id: &str,
        command: SessionCommand,
    ) -> Result<Session, ApiError> {
        self.post(
            &format!("/api/sessions/{session_id}/{}", command.as_str()),
            &json!({}),
        )
        .await?
        .json()
        .await
        .map_err(|e| ApiError::malformed(e.to_string()))
    }

    async fn delete(&self, session_id: &str) -> Result<(), ApiError> {
        debug!(session_id, "DELETE session");
        let resp = self
            .http
            .delete(self.url(&format!("/api/sessions/{session_id}")))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(resp).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, ApiError> {
        self.get_json("/api/sessions").await
    }
}
