// crates/types/src/wire.rs
//! Wire protocol for the pub/sub channel.
//!
//! The transport carries loosely-typed JSON frames distinguished by a
//! string event name. Everything is validated once, here, at the channel
//! boundary: `decode_event` either produces a well-typed [`ChannelEvent`]
//! or rejects the frame with a [`DecodeError`]. Downstream handlers never
//! touch raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;
use crate::session::{Session, SessionMetricsPatch, SessionStatus, Student};

/// One raw frame as carried by the transport, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Named channel ("conversation-{sessionId}", "agent-chat-{id}",
    /// "session-updates").
    pub channel: String,
    /// Event name (the string tag).
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Conventional channel names.
pub fn conversation_channel(session_id: &str) -> String {
    format!("conversation-{session_id}")
}

pub fn agent_chat_channel(conversation_id: &str) -> String {
    format!("agent-chat-{conversation_id}")
}

pub const SESSION_UPDATES_CHANNEL: &str = "session-updates";

/// An award carried inside a `SESSION_STATUS` push, surfaced as a
/// user-facing notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Award {
    /// "xp_gain" | "achievement" | "level_up" | "badge" |
    /// "mission_complete" — open string, unknown kinds map to a generic
    /// notice.
    pub kind: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

/// Every inbound event the core consumes, as a closed tagged union.
///
/// Unknown event names decode to [`ChannelEvent::Unknown`], which is
/// logged and dropped rather than treated as an error — the server adds
/// event kinds freely.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server finished processing input for one stage.
    StageProcessed {
        session_id: String,
        stage: String,
        /// Structured stage payload, merged into
        /// `ConversationContext::stage_data`.
        result: Value,
        /// Server-reported overall progress.
        progress: u8,
        /// Assistant reply text for the transcript, if any.
        response: Option<String>,
    },
    /// The conversation moved to a new stage (self- or peer-originated;
    /// the state machine does not distinguish).
    StageTransition {
        session_id: String,
        to_stage: String,
        progress: Option<u8>,
    },
    /// The whole generation pipeline finished. Authoritative: overrides
    /// any stale in-flight per-agent progress.
    GenerationComplete {
        session_id: String,
        output: Option<Value>,
    },
    /// Generated assets landed in the project store.
    AssetsUploaded {
        project_id: String,
        asset_count: Option<u32>,
    },
    /// A new token-streamed assistant message opened.
    StreamStart { message_id: String },
    /// One content fragment of an in-flight message.
    StreamToken { message_id: String, token: String },
    /// Terminating frame. `final_content`, when present, authoritatively
    /// replaces the assembled buffer.
    StreamEnd {
        message_id: String,
        final_content: Option<String>,
    },
    /// The stream failed mid-flight; the buffer is discarded.
    StreamError { message_id: String, error: String },
    /// Per-agent progress from the generation pipeline.
    ContentProgress {
        session_id: String,
        agent_id: String,
        kind: Option<String>,
        status: crate::generation::AgentState,
        progress: u8,
        current_task: Option<String>,
        metrics: Option<Value>,
        warning: Option<String>,
    },
    /// One agent finished its part.
    ContentComplete {
        session_id: String,
        agent_id: String,
    },
    /// One agent failed. The session fails only if not already complete.
    ContentError {
        session_id: String,
        agent_id: String,
        error: String,
    },
    /// Authoritative full-entity session echo (confirms or overrides
    /// optimistic local state).
    SessionUpdate { session: Session },
    /// Partial session push: only present fields are merged. `metrics`
    /// is itself a field-wise patch; `students`, when present, is the
    /// full replacement roster.
    SessionStatus {
        session_id: String,
        status: Option<SessionStatus>,
        metrics: Option<SessionMetricsPatch>,
        students: Option<Vec<Student>>,
        awards: Vec<Award>,
    },
    /// Unrecognized event name — logged and dropped by the router.
    Unknown { event: String, payload: Value },
}

impl ChannelEvent {
    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &str {
        match self {
            Self::StageProcessed { .. } => "stage_processed",
            Self::StageTransition { .. } => "stage_transition",
            Self::GenerationComplete { .. } => "generation_complete",
            Self::AssetsUploaded { .. } => "assets_uploaded",
            Self::StreamStart { .. } => "stream_start",
            Self::StreamToken { .. } => "stream_token",
            Self::StreamEnd { .. } => "stream_end",
            Self::StreamError { .. } => "stream_error",
            Self::ContentProgress { .. } => "content_progress",
            Self::ContentComplete { .. } => "content_complete",
            Self::ContentError { .. } => "content_error",
            Self::SessionUpdate { .. } => "SESSION_UPDATE",
            Self::SessionStatus { .. } => "SESSION_STATUS",
            Self::Unknown { event, .. } => event,
        }
    }
}

// Intermediate payload shapes. Kept private: the decode step is the only
// place raw payloads are interpreted.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageProcessedPayload {
    session_id: String,
    #[serde(alias = "current_stage", alias = "currentStage")]
    stage: String,
    #[serde(default)]
    result: Value,
    progress: u8,
    #[serde(default)]
    response: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageTransitionPayload {
    session_id: String,
    #[serde(alias = "to_stage", alias = "toStage", alias = "current_stage")]
    to_stage: String,
    #[serde(default)]
    progress: Option<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationCompletePayload {
    session_id: String,
    #[serde(default)]
    output: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetsUploadedPayload {
    project_id: String,
    #[serde(default)]
    asset_count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamStartPayload {
    message_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamTokenPayload {
    message_id: String,
    #[serde(alias = "content", alias = "fragment")]
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEndPayload {
    message_id: String,
    #[serde(default, alias = "content")]
    final_content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamErrorPayload {
    message_id: String,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentProgressPayload {
    session_id: String,
    agent_id: String,
    #[serde(default)]
    kind: Option<String>,
    status: crate::generation::AgentState,
    progress: u8,
    #[serde(default)]
    current_task: Option<String>,
    #[serde(default)]
    metrics: Option<Value>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentCompletePayload {
    session_id: String,
    agent_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentErrorPayload {
    session_id: String,
    agent_id: String,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatusPayload {
    session_id: String,
    #[serde(default)]
    status: Option<SessionStatus>,
    #[serde(default)]
    metrics: Option<SessionMetricsPatch>,
    #[serde(default)]
    students: Option<Vec<Student>>,
    #[serde(default)]
    awards: Vec<Award>,
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, payload: &Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| DecodeError::malformed(event, e.to_string()))
}

/// Validate one raw frame payload into a typed event.
///
/// Unknown event names are not an error — they decode to
/// [`ChannelEvent::Unknown`] so the router can log and drop them.
pub fn decode_event(event: &str, payload: &Value) -> Result<ChannelEvent, DecodeError> {
    let decoded = match event {
        "stage_processed" => {
            let p: StageProcessedPayload = parse(event, payload)?;
            ChannelEvent::StageProcessed {
                session_id: p.session_id,
                stage: p.stage,
                result: p.result,
                progress: p.progress.min(100),
                response: p.response,
            }
        }
        "stage_transition" => {
            let p: StageTransitionPayload = parse(event, payload)?;
            ChannelEvent::StageTransition {
                session_id: p.session_id,
                to_stage: p.to_stage,
                progress: p.progress.map(|v| v.min(100)),
            }
        }
        "generation_complete" => {
            let p: GenerationCompletePayload = parse(event, payload)?;
            ChannelEvent::GenerationComplete {
                session_id: p.session_id,
                output: p.output,
            }
        }
        "assets_uploaded" => {
            let p: AssetsUploadedPayload = parse(event, payload)?;
            ChannelEvent::AssetsUploaded {
                project_id: p.project_id,
                asset_count: p.asset_count,
            }
        }
        "stream_start" => {
            let p: StreamStartPayload = parse(event, payload)?;
            ChannelEvent::StreamStart {
                message_id: p.message_id,
            }
        }
        "stream_token" => {
            let p: StreamTokenPayload = parse(event, payload)?;
            ChannelEvent::StreamToken {
                message_id: p.message_id,
                token: p.token,
            }
        }
        "stream_end" => {
            let p: StreamEndPayload = parse(event, payload)?;
            ChannelEvent::StreamEnd {
                message_id: p.message_id,
                final_content: p.final_content,
            }
        }
        "stream_error" => {
            let p: StreamErrorPayload = parse(event, payload)?;
            ChannelEvent::StreamError {
                message_id: p.message_id,
                error: p.error,
            }
        }
        "content_progress" => {
            let p: ContentProgressPayload = parse(event, payload)?;
            ChannelEvent::ContentProgress {
                session_id: p.session_id,
                agent_id: p.agent_id,
                kind: p.kind,
                status: p.status,
                progress: p.progress.min(100),
                current_task: p.current_task,
                metrics: p.metrics,
                warning: p.warning,
            }
        }
        "content_complete" => {
            let p: ContentCompletePayload = parse(event, payload)?;
            ChannelEvent::ContentComplete {
                session_id: p.session_id,
                agent_id: p.agent_id,
            }
        }
        "content_error" => {
            let p: ContentErrorPayload = parse(event, payload)?;
            ChannelEvent::ContentError {
                session_id: p.session_id,
                agent_id: p.agent_id,
                error: p.error,
            }
        }
        "SESSION_UPDATE" => {
            let session: Session = parse(event, payload)?;
            ChannelEvent::SessionUpdate { session }
        }
        "SESSION_STATUS" => {
            let p: SessionStatusPayload = parse(event, payload)?;
            ChannelEvent::SessionStatus {
                session_id: p.session_id,
                status: p.status,
                metrics: p.metrics,
                students: p.students,
                awards: p.awards,
            }
        }
        _ => ChannelEvent::Unknown {
            event: event.to_string(),
            payload: payload.clone(),
        },
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_stream_token() {
        let event = decode_event("stream_token", &json!({"messageId": "m1", "token": "Hello "}))
            .unwrap();
        assert_eq!(
            event,
            ChannelEvent::StreamToken {
                message_id: "m1".into(),
                token: "Hello ".into()
            }
        );
    }

    #[test]
    fn test_decode_stream_token_content_alias() {
        // Some server builds send the fragment under "content".
        let event =
            decode_event("stream_token", &json!({"messageId": "m1", "content": "hi"})).unwrap();
        assert!(matches!(event, ChannelEvent::StreamToken { token, .. } if token == "hi"));
    }

    #[test]
    fn test_decode_stage_processed_clamps_progress() {
        let event = decode_event(
            "stage_processed",
            &json!({"sessionId": "s1", "stage": "discovery", "result": {}, "progress": 250}),
        )
        .unwrap();
        assert!(matches!(event, ChannelEvent::StageProcessed { progress: 100, .. }));

        // Values outside u8 range are a malformed frame, not a clamp.
        let err = decode_event(
            "stage_processed",
            &json!({"sessionId": "s1", "stage": "discovery", "result": {}, "progress": 300}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_decode_malformed_known_event_rejected() {
        let err = decode_event("stream_token", &json!({"token": "no id"})).unwrap_err();
        assert!(err.to_string().contains("stream_token"));
    }

    #[test]
    fn test_decode_unknown_event_passes_through() {
        let event = decode_event("totally_new_thing", &json!({"x": 1})).unwrap();
        assert!(matches!(event, ChannelEvent::Unknown { ref event, .. } if event == "totally_new_thing"));
    }

    #[test]
    fn test_decode_session_status_partial() {
        let event = decode_event(
            "SESSION_STATUS",
            &json!({"sessionId": "s1", "metrics": {"activePlayers": 4}}),
        )
        .unwrap();
        match event {
            ChannelEvent::SessionStatus {
                session_id,
                status,
                metrics,
                students,
                awards,
            } => {
                assert_eq!(session_id, "s1");
                assert!(status.is_none());
                // subfields absent from the push decode to None, not 0
                let metrics = metrics.unwrap();
                assert_eq!(metrics.active_players, Some(4));
                assert!(metrics.questions_answered.is_none());
                assert!(metrics.avg_score.is_none());
                assert!(students.is_none());
                assert!(awards.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(conversation_channel("abc"), "conversation-abc");
        assert_eq!(agent_chat_channel("abc"), "agent-chat-abc");
    }
}
