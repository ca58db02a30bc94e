// crates/core/src/session.rs
//! Learning-session lifecycle management.
//!
//! Control commands update local state optimistically as a
//! *local-provisional* guess and are expected to be confirmed by a
//! server push or response; the authoritative *server-confirmed* state
//! always wins over the guess. Partial pushes (metrics, roster deltas)
//! merge by session id without clobbering absent fields.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use questline_types::{
    Award, Session, SessionError, SessionMetricsPatch, SessionSettings, SessionStatus, Student,
};

use crate::api::{SessionApi, SessionCommand};

/// Local-provisional vs. server-confirmed state for one session.
struct TrackedSession {
    confirmed: Session,
    /// Optimistic guess awaiting confirmation. Cleared when the server
    /// confirms or rejects.
    provisional: Option<Session>,
}

impl TrackedSession {
    fn visible(&self) -> &Session {
        self.provisional.as_ref().unwrap_or(&self.confirmed)
    }
}

pub struct SessionLifecycleManager {
    api: Arc<dyn SessionApi>,
    sessions: HashMap<String, TrackedSession>,
    /// Ids of deleted sessions. Late events for these are discarded —
    /// deletion is terminal.
    tombstones: HashSet<String>,
}

impl SessionLifecycleManager {
    pub fn new(api: Arc<dyn SessionApi>) -> Self {
        Self {
            api,
            sessions: HashMap::new(),
            tombstones: HashSet::new(),
        }
    }

    // ------------------------------------------------------------------
    // Read-only observable state
    // ------------------------------------------------------------------

    /// The UI-visible session list (provisional state shown while a
    /// command awaits confirmation).
    pub fn sessions(&self) -> Vec<&Session> {
        self.sessions.values().map(|t| t.visible()).collect()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id).map(|t| t.visible())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Create a new session: a local draft appears immediately, then the
    /// server acknowledgment replaces it (the server may assign a new id).
    pub async fn create(
        &mut self,
        settings: SessionSettings,
        content: serde_json::Value,
    ) -> Result<String, SessionError> {
        let draft = Session::draft(settings, content);
        let local_id = draft.id.clone();
        self.sessions.insert(
            local_id.clone(),
            TrackedSession {
                confirmed: draft.clone(),
                provisional: None,
            },
        );

        match self.api.create(&draft).await {
            Ok(confirmed) => {
                let id = confirmed.id.clone();
                if id != local_id {
                    self.sessions.remove(&local_id);
                }
                info!(session_id = %id, "session created");
                self.sessions.insert(
                    id.clone(),
                    TrackedSession {
                        confirmed,
                        provisional: None,
                    },
                );
                Ok(id)
            }
            Err(e) => {
                // the draft never existed server-side; remove the ghost
                self.sessions.remove(&local_id);
                Err(SessionError::rejected(local_id, e.to_string()))
            }
        }
    }

    pub async fn start(&mut self, session_id: &str) -> Result<(), SessionError> {
        self.command(session_id, SessionCommand::Start, SessionStatus::Active)
            .await
    }

    pub async fn pause(&mut self, session_id: &str) -> Result<(), SessionError> {
        self.command(session_id, SessionCommand::Pause, SessionStatus::Paused)
            .await
    }

    pub async fn stop(&mut self, session_id: &str) -> Result<(), SessionError> {
        self.command(session_id, SessionCommand::Stop, SessionStatus::Completed)
            .await
    }

    pub async fn archive(&mut self, session_id: &str) -> Result<(), SessionError> {
        self.command(session_id, SessionCommand::Archive, SessionStatus::Archived)
            .await
    }

    /// Create a new draft copying this session's settings and content,
    /// with fresh identity, participants, metrics, and timestamps.
    pub async fn duplicate(&mut self, session_id: &str) -> Result<String, SessionError> {
        let source = self
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        let copy = source.duplicate();
        self.create(copy.settings, copy.content).await
    }

    /// Delete is terminal: the session is removed and late events for its
    /// id are discarded forever.
    pub async fn delete(&mut self, session_id: &str) -> Result<(), SessionError> {
        let Some(tracked) = self.sessions.get(session_id) else {
            return Err(SessionError::UnknownSession(session_id.to_string()));
        };
        // deletion is only legal from a non-terminal state
        let from = tracked.visible().status;
        if from.is_terminal() {
            return Err(SessionError::rejected(
                session_id,
                format!("cannot delete a {from:?} session"),
            ));
        }
        self.api
            .delete(session_id)
            .await
            .map_err(|e| SessionError::rejected(session_id, e.to_string()))?;
        self.sessions.remove(session_id);
        self.tombstones.insert(session_id.to_string());
        info!(session_id, "session deleted");
        Ok(())
    }

    /// Shared optimistic-command path: validate the transition against
    /// the visible state, apply the provisional guess, send the command,
    /// and reconcile with the authoritative response.
    async fn command(
        &mut self,
        session_id: &str,
        command: SessionCommand,
        optimistic: SessionStatus,
    ) -> Result<(), SessionError> {
        let tracked = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;

        let from = tracked.visible().status;
        if !from.can_transition_to(optimistic) {
            return Err(SessionError::InvalidTransition {
                from,
                to: optimistic,
            });
        }

        let mut guess = tracked.visible().clone();
        guess.status = optimistic;
        guess.updated_at = chrono::Utc::now().timestamp();
        tracked.provisional = Some(guess);

        match self.api.command(session_id, command).await {
            Ok(confirmed) => {
                if let Some(tracked) = self.sessions.get_mut(session_id) {
                    if confirmed.status != optimistic {
                        // e.g. start rejected because max players exceeded;
                        // the authoritative push overwrites the guess
                        debug!(
                            session_id,
                            optimistic = ?optimistic,
                            confirmed = ?confirmed.status,
                            "server disagreed with optimistic transition"
                        );
                    }
                    tracked.confirmed = confirmed;
                    tracked.provisional = None;
                }
                Ok(())
            }
            Err(e) => {
                // revert the optimistic guess; confirmed state stands
                if let Some(tracked) = self.sessions.get_mut(session_id) {
                    tracked.provisional = None;
                }
                Err(SessionError::rejected(session_id, e.to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound pushes
    // ------------------------------------------------------------------

    /// Authoritative full-entity echo (`SESSION_UPDATE`). Confirmed
    /// always wins over any provisional guess.
    pub fn apply_update(&mut self, session: Session) {
        if self.tombstones.contains(&session.id) {
            debug!(session_id = %session.id, "update for deleted session, discarding");
            return;
        }
        if let Some(tracked) = self.sessions.get_mut(&session.id) {
            if tracked.confirmed.status.is_terminal() && !session.status.is_terminal() {
                debug!(
                    session_id = %session.id,
                    "push would revive terminal session, discarding"
                );
                return;
            }
            tracked.confirmed = session;
            tracked.provisional = None;
        } else {
            // a session created elsewhere (another device, the teacher
            // dashboard) — adopt it
            self.sessions.insert(
                session.id.clone(),
                TrackedSession {
                    confirmed: session,
                    provisional: None,
                },
            );
        }
    }

    /// Partial push (`SESSION_STATUS`): only fields present in the update
    /// are merged; everything else is left untouched. Returns the awards
    /// carried by the push so the caller can surface notices.
    pub fn apply_status(
        &mut self,
        session_id: &str,
        status: Option<SessionStatus>,
        metrics: Option<SessionMetricsPatch>,
        students: Option<Vec<Student>>,
        awards: Vec<Award>,
    ) -> Vec<Award> {
        if self.tombstones.contains(session_id) {
            debug!(session_id, "status push for deleted session, discarding");
            return Vec::new();
        }
        let Some(tracked) = self.sessions.get_mut(session_id) else {
            warn!(session_id, "status push for unknown session, dropping");
            return Vec::new();
        };
        if tracked.confirmed.status.is_terminal()
            && status.map(|s| !s.is_terminal()).unwrap_or(false)
        {
            debug!(session_id, "status push would revive terminal session, discarding");
            return Vec::new();
        }

        if let Some(status) = status {
            tracked.confirmed.status = status;
        }
        if let Some(patch) = metrics {
            patch.apply_to(&mut tracked.confirmed.metrics);
        }
        if let Some(students) = students {
            tracked.confirmed.participants.students = students;
        }
        tracked.confirmed.updated_at = chrono::Utc::now().timestamp();
        awards
    }

    /// Replace all confirmed state with a fresh server snapshot (used
    /// after a reconnect gap; provisional guesses are dropped since their
    /// outcome is unknowable).
    pub fn refresh(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions
            .into_iter()
            .filter(|s| !self.tombstones.contains(&s.id))
            .map(|s| {
                (
                    s.id.clone(),
                    TrackedSession {
                        confirmed: s,
                        provisional: None,
                    },
                )
            })
            .collect();
    }

    /// Pull the full list from the API and adopt it.
    pub async fn resync(&mut self) -> Result<(), SessionError> {
        let list = self
            .api
            .list()
            .await
            .map_err(|e| SessionError::rejected("*", e.to_string()))?;
        self.refresh(list);
        Ok(())
    }
}
