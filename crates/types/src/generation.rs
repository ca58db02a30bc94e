// crates/types/src/generation.rs
//! Multi-agent generation pipeline types. One `GenerationSession` tracks
//! N independent worker agents until the run completes, fails, or is
//! cancelled.

use serde::{Deserialize, Serialize};

/// Execution state of a single generation agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Working,
    Completed,
    Error,
    Cancelled,
}

/// One independent worker contributing one part of the generated content
/// (terrain, quiz, script, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub id: String,
    /// Agent kind label ("terrain", "quiz", ...). Open string — the
    /// server adds kinds freely.
    pub kind: String,
    pub status: AgentState,
    /// Per-agent progress 0..=100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentStatus {
    pub fn idle(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            status: AgentState::Idle,
            progress: 0,
            current_task: None,
            metrics: None,
            error: None,
        }
    }
}

/// Overall state of one run of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Initializing,
    Processing,
    Reviewing,
    Completed,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    /// Terminal states discard all further progress/status events.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One run of the multi-agent content-creation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSession {
    pub id: String,
    pub status: GenerationStatus,
    /// Unix timestamp (seconds).
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub agents: Vec<AgentStatus>,
    /// Final (or partial, on failure) pipeline output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl GenerationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: GenerationStatus::Initializing,
            started_at: chrono::Utc::now().timestamp(),
            ended_at: None,
            agents: Vec::new(),
            output: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Overall progress: the arithmetic mean of all agent progress
    /// values. Derived, never stored — so it cannot drift from the
    /// per-agent state.
    pub fn total_progress(&self) -> u8 {
        if self.agents.is_empty() {
            return 0;
        }
        let sum: u32 = self.agents.iter().map(|a| a.progress as u32).sum();
        (sum / self.agents.len() as u32) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_progress_empty_is_zero() {
        let session = GenerationSession::new("gen-1");
        assert_eq!(session.total_progress(), 0);
    }

    #[test]
    fn test_total_progress_is_mean() {
        let mut session = GenerationSession::new("gen-1");
        let mut terrain = AgentStatus::idle("terrain", "terrain");
        terrain.progress = 100;
        let mut quiz = AgentStatus::idle("quiz", "quiz");
        quiz.progress = 50;
        session.agents = vec![terrain, quiz];
        assert_eq!(session.total_progress(), 75);
    }

    #[test]
    fn test_terminal_states() {
        assert!(GenerationStatus::Completed.is_terminal());
        assert!(GenerationStatus::Failed.is_terminal());
        assert!(GenerationStatus::Cancelled.is_terminal());
        assert!(!GenerationStatus::Processing.is_terminal());
        assert!(!GenerationStatus::Reviewing.is_terminal());
    }
}
