// crates/types/src/conversation.rs
//! Conversation-side domain types: the ordered stage sequence, the
//! per-conversation context owned by the state machine, and the chat
//! transcript entries it produces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Status of one stage in the conversation sequence.
///
/// Invariant maintained by the state machine: at most one stage is
/// `Active`; every stage before it is `Completed`, every stage after it
/// is `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
}

/// One step in the fixed ordered conversation sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Stable identifier the server uses in `current_stage` fields
    /// (e.g. "discovery", "requirements").
    pub id: String,
    /// Human-readable label for the UI.
    pub title: String,
    pub status: StageStatus,
}

impl Stage {
    pub fn pending(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: StageStatus::Pending,
        }
    }
}

/// The canonical stage sequence. The server may name stages outside this
/// list; they are appended as they appear rather than rejected.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::pending("greeting", "Welcome"),
        Stage::pending("discovery", "Discovery"),
        Stage::pending("requirements", "Requirements"),
        Stage::pending("personalization", "Personalization"),
        Stage::pending("content_design", "Content design"),
        Stage::pending("uniqueness", "Uniqueness"),
        Stage::pending("validation", "Validation"),
        Stage::pending("generation", "Generation & review"),
    ]
}

/// Id of the terminal stage in which `generate()` is valid.
pub const GENERATION_STAGE: &str = "generation";

/// Resources derived from a completed conversation (the project the
/// generation pipeline writes into, and where to sync it from).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedResources {
    pub project_id: String,
    pub sync_endpoint: String,
}

/// Per-conversation state owned exclusively by the conversation state
/// machine. Mutated only by stage-transition events and input
/// submissions; destroyed on restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub session_id: String,
    pub current_stage: String,
    /// Overall progress 0..=100. The server is authoritative — local
    /// code never guesses this value.
    pub progress: u8,
    /// Structured payload collected per stage, keyed by stage id.
    #[serde(default)]
    pub stage_data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedResources>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, first_stage: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_stage: first_stage.into(),
            progress: 0,
            stage_data: HashMap::new(),
            derived: None,
        }
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One transcript entry. A message with `is_streaming = true` is mutable
/// (its `content` grows) until the terminating stream-end event arrives,
/// after which it is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    pub is_streaming: bool,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
            is_streaming: false,
        }
    }

    /// An assistant message opened by a `stream_start` event. Content
    /// grows as tokens arrive.
    pub fn streaming(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: chrono::Utc::now().timestamp(),
            is_streaming: true,
        }
    }
}
