// crates/core/src/generation.rs
//! Tracks one run of the multi-agent generation pipeline.
//!
//! Merges partial, possibly out-of-order per-agent updates into a
//! consistent `GenerationSession`. `generation_complete` is
//! authoritative: it overrides any stale in-flight progress, and the
//! resulting completion is sticky — a late error for another agent
//! cannot downgrade it. All events after a terminal state are discarded.

use tracing::{debug, info, warn};

use questline_types::{AgentState, AgentStatus, GenerationSession, GenerationStatus};

use crate::api::AgentSeed;

pub struct GenerationProgressAggregator {
    session: GenerationSession,
}

impl GenerationProgressAggregator {
    /// Start tracking a generation session, seeding the agent roster the
    /// server announced. Unseeded agents are still accepted later.
    pub fn new(generation_id: impl Into<String>, seeds: &[AgentSeed]) -> Self {
        let mut session = GenerationSession::new(generation_id);
        session.agents = seeds
            .iter()
            .map(|s| AgentStatus::idle(&s.id, &s.kind))
            .collect();
        Self { session }
    }

    pub fn session(&self) -> &GenerationSession {
        &self.session
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn is_terminal(&self) -> bool {
        self.session.status.is_terminal()
    }

    /// Upsert one agent's reported fields and recompute overall
    /// progress. Unknown agent ids are accepted and added — the server
    /// adds agents freely.
    #[allow(clippy::too_many_arguments)]
    pub fn on_progress(
        &mut self,
        agent_id: &str,
        kind: Option<&str>,
        status: AgentState,
        progress: u8,
        current_task: Option<String>,
        metrics: Option<serde_json::Value>,
        warning: Option<String>,
    ) {
        if self.discard_if_terminal("content_progress") {
            return;
        }

        // an `error` status on a progress event is a failure report in
        // disguise; its message (if any) rides in the warning field
        let failure = (status == AgentState::Error)
            .then(|| warning.clone().unwrap_or_else(|| "reported error state".to_string()));

        let agent = self.upsert_agent(agent_id, kind);
        agent.status = status;
        agent.progress = progress.min(100);
        if current_task.is_some() {
            agent.current_task = current_task;
        }
        if metrics.is_some() {
            agent.metrics = metrics;
        }
        if let Some(message) = failure {
            agent.error = Some(message.clone());
            self.session.errors.push(format!("{agent_id}: {message}"));
            self.session.status = GenerationStatus::Failed;
            self.session.ended_at = Some(chrono::Utc::now().timestamp());
            warn!(
                generation_id = %self.session.id,
                agent_id,
                error = %message,
                "generation agent failed"
            );
            return;
        }
        if let Some(warning) = warning {
            self.session.warnings.push(warning);
        }

        if self.session.status == GenerationStatus::Initializing {
            self.session.status = GenerationStatus::Processing;
        }
        self.maybe_enter_review();
        debug!(
            generation_id = %self.session.id,
            agent_id,
            progress = self.session.total_progress(),
            "agent progress merged"
        );
    }

    /// One agent finished its part.
    pub fn on_agent_complete(&mut self, agent_id: &str) {
        if self.discard_if_terminal("content_complete") {
            return;
        }
        let agent = self.upsert_agent(agent_id, None);
        agent.status = AgentState::Completed;
        agent.progress = 100;
        if self.session.status == GenerationStatus::Initializing {
            self.session.status = GenerationStatus::Processing;
        }
        self.maybe_enter_review();
    }

    /// Authoritative pipeline completion: every agent is forced to
    /// `Completed`/100 regardless of last reported state, and the session
    /// completes. Overrides stale in-flight progress.
    pub fn on_complete(&mut self, output: Option<serde_json::Value>) {
        if self.discard_if_terminal("generation_complete") {
            return;
        }
        for agent in &mut self.session.agents {
            agent.status = AgentState::Completed;
            agent.progress = 100;
            agent.current_task = None;
        }
        self.session.status = GenerationStatus::Completed;
        self.session.ended_at = Some(chrono::Utc::now().timestamp());
        if output.is_some() {
            self.session.output = output;
        }
        info!(generation_id = %self.session.id, "generation complete");
    }

    /// One agent failed. Only that agent is marked; the session fails
    /// unless completion already happened (terminal guard above). Partial
    /// output is preserved for inspection.
    pub fn on_error(&mut self, agent_id: &str, error: &str) {
        if self.discard_if_terminal("content_error") {
            return;
        }
        let agent = self.upsert_agent(agent_id, None);
        agent.status = AgentState::Error;
        agent.error = Some(error.to_string());
        self.session.errors.push(format!("{agent_id}: {error}"));
        self.session.status = GenerationStatus::Failed;
        self.session.ended_at = Some(chrono::Utc::now().timestamp());
        warn!(generation_id = %self.session.id, agent_id, error, "generation agent failed");
    }

    /// Cancel the run: working agents become `Cancelled`, completed
    /// agents are untouched. Terminal — nothing can revive the session.
    pub fn cancel(&mut self) {
        if self.discard_if_terminal("cancel") {
            return;
        }
        for agent in &mut self.session.agents {
            if agent.status == AgentState::Working {
                agent.status = AgentState::Cancelled;
            }
        }
        self.session.status = GenerationStatus::Cancelled;
        self.session.ended_at = Some(chrono::Utc::now().timestamp());
        info!(generation_id = %self.session.id, "generation cancelled");
    }

    fn upsert_agent(&mut self, agent_id: &str, kind: Option<&str>) -> &mut AgentStatus {
        if let Some(idx) = self.session.agents.iter().position(|a| a.id == agent_id) {
            return &mut self.session.agents[idx];
        }
        self.session
            .agents
            .push(AgentStatus::idle(agent_id, kind.unwrap_or(agent_id)));
        self.session.agents.last_mut().unwrap()
    }

    /// All agents done but no authoritative completion yet: the server
    /// is reviewing the combined output.
    fn maybe_enter_review(&mut self) {
        if !self.session.agents.is_empty()
            && self
                .session
                .agents
                .iter()
                .all(|a| a.status == AgentState::Completed)
        {
            self.session.status = GenerationStatus::Reviewing;
        }
    }

    fn discard_if_terminal(&self, event: &str) -> bool {
        if self.session.status.is_terminal() {
            debug!(
                generation_id = %self.session.id,
                status = ?self.session.status,
                event,
                "event for terminal generation session, discarding"
            );
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeds() -> Vec<AgentSeed> {
        vec![
            AgentSeed {
                id: "terrain".into(),
                kind: "terrain".into(),
            },
            AgentSeed {
                id: "quiz".into(),
                kind: "quiz".into(),
            },
        ]
    }

    fn agent<'a>(agg: &'a GenerationProgressAggregator, id: &str) -> &'a AgentStatus {
        agg.session().agents.iter().find(|a| a.id == id).unwrap()
    }

    #[test]
    fn test_total_progress_is_always_the_mean() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        assert_eq!(agg.session().total_progress(), 0);

        agg.on_progress("terrain", None, AgentState::Working, 80, None, None, None);
        assert_eq!(agg.session().total_progress(), 40);

        agg.on_progress("quiz", None, AgentState::Working, 40, None, None, None);
        assert_eq!(agg.session().total_progress(), 60);
    }

    #[test]
    fn test_unknown_agent_accepted_and_added() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_progress(
            "script",
            Some("script"),
            AgentState::Working,
            30,
            Some("writing intro".into()),
            None,
            None,
        );
        assert_eq!(agg.session().agents.len(), 3);
        assert_eq!(agent(&agg, "script").progress, 30);
        assert_eq!(
            agent(&agg, "script").current_task.as_deref(),
            Some("writing intro")
        );
    }

    #[test]
    fn test_complete_overrides_stale_progress() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_progress("terrain", None, AgentState::Working, 55, None, None, None);

        agg.on_complete(Some(serde_json::json!({"world": "ready"})));

        assert_eq!(agg.session().status, GenerationStatus::Completed);
        assert_eq!(agg.session().total_progress(), 100);
        assert!(agg
            .session()
            .agents
            .iter()
            .all(|a| a.status == AgentState::Completed && a.progress == 100));
        assert!(agg.session().ended_at.is_some());
    }

    #[test]
    fn test_completion_is_sticky_against_late_error() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_agent_complete("terrain");
        agg.on_complete(None);

        // late error for a different agent arrives after completion
        agg.on_error("quiz", "renderer crashed");

        assert_eq!(agg.session().status, GenerationStatus::Completed);
        assert_eq!(agent(&agg, "quiz").status, AgentState::Completed);
        assert!(agg.session().errors.is_empty());
    }

    #[test]
    fn test_error_fails_session_and_preserves_partial_output() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_progress("terrain", None, AgentState::Working, 90, None, None, None);
        agg.on_error("quiz", "no questions generated");

        assert_eq!(agg.session().status, GenerationStatus::Failed);
        assert_eq!(agent(&agg, "quiz").status, AgentState::Error);
        // the other agent keeps its reported state for inspection
        assert_eq!(agent(&agg, "terrain").progress, 90);
        assert_eq!(agg.session().errors, vec!["quiz: no questions generated"]);
    }

    #[test]
    fn test_error_status_on_progress_fails_session() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_progress(
            "quiz",
            None,
            AgentState::Error,
            60,
            None,
            None,
            Some("question bank exhausted".into()),
        );

        assert_eq!(agg.session().status, GenerationStatus::Failed);
        assert_eq!(agent(&agg, "quiz").status, AgentState::Error);
        assert_eq!(
            agent(&agg, "quiz").error.as_deref(),
            Some("question bank exhausted")
        );
        assert_eq!(agg.session().errors, vec!["quiz: question bank exhausted"]);
        // a failure report is not also a warning
        assert!(agg.session().warnings.is_empty());
        assert!(agg.session().ended_at.is_some());
    }

    #[test]
    fn test_cancel_marks_working_only() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_agent_complete("terrain");
        agg.on_progress("quiz", None, AgentState::Working, 10, None, None, None);

        agg.cancel();

        assert_eq!(agg.session().status, GenerationStatus::Cancelled);
        assert_eq!(agent(&agg, "terrain").status, AgentState::Completed);
        assert_eq!(agent(&agg, "quiz").status, AgentState::Cancelled);
    }

    #[test]
    fn test_terminal_session_discards_all_events() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.cancel();

        agg.on_progress("terrain", None, AgentState::Working, 99, None, None, None);
        agg.on_agent_complete("quiz");
        agg.on_complete(None);

        assert_eq!(agg.session().status, GenerationStatus::Cancelled);
        assert_eq!(agg.session().total_progress(), 0);
    }

    #[test]
    fn test_all_agents_done_enters_review() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_agent_complete("terrain");
        assert_eq!(agg.session().status, GenerationStatus::Processing);
        agg.on_agent_complete("quiz");
        assert_eq!(agg.session().status, GenerationStatus::Reviewing);
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut agg = GenerationProgressAggregator::new("gen-1", &seeds());
        agg.on_progress(
            "quiz",
            None,
            AgentState::Working,
            50,
            None,
            None,
            Some("question pool thin for grade 5".into()),
        );
        assert_eq!(agg.session().warnings.len(), 1);
    }
}
