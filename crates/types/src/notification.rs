// crates/types/src/notification.rs
//! User-facing notices produced by the notification router.

use serde::{Deserialize, Serialize};

/// Closed set of event categories the router maps to notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeCategory {
    Achievement,
    LevelUp,
    XpGain,
    Badge,
    MissionComplete,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticePriority {
    Low,
    Normal,
    High,
}

/// One visible notice. Duration-bound notices self-expire; the rest stay
/// until dismissed or evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub category: NoticeCategory,
    pub priority: NoticePriority,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Auto-dismiss after this many milliseconds, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl Notice {
    pub fn new(category: NoticeCategory, priority: NoticePriority, title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            priority,
            title: title.into(),
            body: None,
            duration_ms: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}
