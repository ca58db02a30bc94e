// crates/types/src/session.rs
//! Learning-session entity: a scheduled multiplayer activity instance
//! with participants and live metrics, distinct from a generation
//! session.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a learning session.
///
/// Allowed transitions: `Draft -> Ready | Active`, `Active <-> Paused`,
/// `Active | Paused -> Completed`, any non-terminal `-> Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Draft,
    Ready,
    Active,
    Paused,
    Completed,
    Archived,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Archived)
    }

    /// Whether the transition `self -> to` is allowed by the lifecycle
    /// graph. Self-transitions are treated as allowed (idempotent server
    /// echoes).
    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (Draft, Ready) | (Draft, Active) => true,
            (Ready, Active) => true,
            (Active, Paused) | (Paused, Active) => true,
            (Active, Completed) | (Paused, Completed) => true,
            (from, Archived) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Participation state of one student within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Invited,
    Joined,
    Active,
    Left,
    Kicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub status: StudentStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participants {
    #[serde(default)]
    pub teacher_id: String,
    #[serde(default)]
    pub students: Vec<Student>,
}

/// Teacher-chosen settings, copied verbatim on `duplicate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub max_players: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_players: 30,
            duration_minutes: None,
            subject: None,
            grade_level: None,
        }
    }
}

/// Live aggregate metrics pushed over the channel while a session runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    #[serde(default)]
    pub active_players: u32,
    #[serde(default)]
    pub questions_answered: u64,
    #[serde(default)]
    pub avg_score: f64,
}

/// Field-wise partial metrics update carried by a `SESSION_STATUS` push.
/// Absent fields leave the current value untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetricsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_players: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions_answered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_score: Option<f64>,
}

impl SessionMetricsPatch {
    pub fn apply_to(&self, metrics: &mut SessionMetrics) {
        if let Some(v) = self.active_players {
            metrics.active_players = v;
        }
        if let Some(v) = self.questions_answered {
            metrics.questions_answered = v;
        }
        if let Some(v) = self.avg_score {
            metrics.avg_score = v;
        }
    }
}

/// A multiplayer learning session. Created locally in `Draft`, confirmed
/// by a server acknowledgment, mutated by control commands and inbound
/// participant/metric pushes, removed only by explicit delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    /// Opaque generated-content reference; the server owns its shape.
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub participants: Participants,
    #[serde(default)]
    pub metrics: SessionMetrics,
    /// Unix timestamps (seconds).
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    /// A fresh local draft, pending server acknowledgment.
    pub fn draft(settings: SessionSettings, content: serde_json::Value) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Draft,
            settings,
            content,
            participants: Participants::default(),
            metrics: SessionMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A new draft copying this session's settings and content but
    /// resetting id, status, participants, metrics, and timestamps.
    pub fn duplicate(&self) -> Self {
        Self::draft(self.settings.clone(), self.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_graph_happy_path() {
        use SessionStatus::*;
        assert!(Draft.can_transition_to(Ready));
        assert!(Draft.can_transition_to(Active));
        assert!(Ready.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_transition_graph_rejections() {
        use SessionStatus::*;
        assert!(!Draft.can_transition_to(Paused));
        assert!(!Draft.can_transition_to(Completed));
        assert!(!Ready.can_transition_to(Paused));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Active));
    }

    #[test]
    fn test_only_non_terminal_states_can_archive() {
        use SessionStatus::*;
        for from in [Draft, Ready, Active, Paused] {
            assert!(from.can_transition_to(Archived), "{from:?} -> Archived");
        }
        assert!(!Completed.can_transition_to(Archived));
        assert!(!Archived.can_transition_to(Completed));
    }

    #[test]
    fn test_duplicate_resets_identity() {
        let mut original = Session::draft(SessionSettings::default(), serde_json::json!({"world": 1}));
        original.status = SessionStatus::Completed;
        original.participants.students.push(Student {
            id: "s1".into(),
            status: StudentStatus::Joined,
        });
        original.metrics.active_players = 12;

        let copy = original.duplicate();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, SessionStatus::Draft);
        assert_eq!(copy.settings, original.settings);
        assert_eq!(copy.content, original.content);
        assert!(copy.participants.students.is_empty());
        assert_eq!(copy.metrics, SessionMetrics::default());
    }
}
