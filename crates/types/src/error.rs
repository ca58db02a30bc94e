// crates/types/src/error.rs
use thiserror::Error;

/// Errors from the pub/sub channel layer. Transport failures are retried
/// with backoff by the channel itself; callers only ever see
/// `Unavailable` (send attempted while disconnected).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel unavailable: not connected")]
    Unavailable,

    #[error("channel connect failed: {0}")]
    ConnectFailed(String),

    #[error("channel closed")]
    Closed,
}

/// A frame that failed the validating decode at the channel boundary.
/// Rejected once, there — downstream code never sees malformed payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {event} payload: {message}")]
    Malformed { event: String, message: String },
}

impl DecodeError {
    pub fn malformed(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            event: event.into(),
            message: message.into(),
        }
    }
}

/// Errors from the request/response API boundary. Transport errors may
/// be retried by the caller; the rest are semantic and never retried
/// automatically.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }
}

/// Errors surfaced by the conversation state machine. Semantic failures
/// leave the conversation in its last good state; the user may retry
/// explicitly.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("failed to start conversation: {0}")]
    StartFailed(String),

    #[error("failed to submit input for stage {stage}: {message}")]
    InputFailed { stage: String, message: String },

    #[error("failed to advance stage: {0}")]
    AdvanceFailed(String),

    #[error("input is empty")]
    EmptyInput,

    #[error("another command is in flight")]
    Busy,

    #[error("operation requires stage {expected}, current stage is {actual}")]
    WrongStage { expected: String, actual: String },

    #[error("conversation not started")]
    NotStarted,
}

impl ConversationError {
    pub fn input_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InputFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Errors from learning-session lifecycle commands.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::session::SessionStatus,
        to: crate::session::SessionStatus,
    },

    #[error("command rejected for session {session_id}: {reason}")]
    CommandRejected { session_id: String, reason: String },

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl SessionError {
    pub fn rejected(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandRejected {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::malformed("stream_token", "missing field `messageId`");
        assert!(err.to_string().contains("stream_token"));
        assert!(err.to_string().contains("messageId"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = SessionError::InvalidTransition {
            from: SessionStatus::Draft,
            to: SessionStatus::Paused,
        };
        assert!(err.to_string().contains("Draft"));
        assert!(err.to_string().contains("Paused"));
    }
}
