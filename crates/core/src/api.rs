// crates/core/src/api.rs
//! Trait seams between the state machines and the request/response API.
//!
//! The state machines only ever see these validated shapes; the concrete
//! reqwest client in `questline-api` does the envelope parsing and turns
//! malformed responses into `ApiError` before anything reaches a machine.

use async_trait::async_trait;
use serde_json::Value;

use questline_types::{ApiError, ConversationContext, Session};

/// Validated response to a conversation `start` request.
#[derive(Debug, Clone)]
pub struct StartedConversation {
    pub session_id: String,
    /// The server-declared first stage.
    pub first_stage: String,
}

/// Validated response to an input submission: the stage payload to merge
/// and the authoritative overall progress.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: String,
    pub result: Value,
    pub progress: u8,
    /// Assistant reply for the transcript, if the server sent one.
    pub response: Option<String>,
}

/// Validated response to an `advance` request.
#[derive(Debug, Clone)]
pub struct StageAdvance {
    pub to_stage: String,
    pub progress: Option<u8>,
}

/// One agent the server plans to run, announced at generation start.
#[derive(Debug, Clone)]
pub struct AgentSeed {
    pub id: String,
    pub kind: String,
}

/// Validated response to a `generate` request.
#[derive(Debug, Clone)]
pub struct StartedGeneration {
    pub generation_id: String,
    pub agents: Vec<AgentSeed>,
    pub project_id: Option<String>,
    pub sync_endpoint: Option<String>,
}

/// Conversation start/input/advance/generate endpoints, plus the state
/// snapshot used to recover from a missed-event gap after reconnect.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn start(&self, initial_prompt: &str) -> Result<StartedConversation, ApiError>;

    async fn submit_input(
        &self,
        session_id: &str,
        stage: &str,
        text: &str,
    ) -> Result<StageResult, ApiError>;

    async fn advance(&self, session_id: &str) -> Result<StageAdvance, ApiError>;

    async fn generate(&self, session_id: &str) -> Result<StartedGeneration, ApiError>;

    async fn snapshot(&self, session_id: &str) -> Result<ConversationContext, ApiError>;
}

/// Lifecycle control commands sent to the session CRUD API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Pause,
    Stop,
    Archive,
}

impl SessionCommand {
    /// Path segment used by the REST client.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Archive => "archive",
        }
    }
}

/// Learning-session CRUD endpoints. Every mutating call returns the
/// updated authoritative `Session`.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create(&self, draft: &Session) -> Result<Session, ApiError>;

    async fn command(&self, session_id: &str, command: SessionCommand)
        -> Result<Session, ApiError>;

    async fn delete(&self, session_id: &str) -> Result<(), ApiError>;

    async fn list(&self) -> Result<Vec<Session>, ApiError>;
}
