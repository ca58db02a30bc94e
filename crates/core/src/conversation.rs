// crates/core/src/conversation.rs
//! The multi-stage dialogue driver.
//!
//! Owns the stage list, the `ConversationContext`, and the chat
//! transcript. All mutation happens in response to a user command or a
//! decoded channel event; stage transitions are applied identically
//! whether they originate from this client's own request or from a peer
//! acting on the same session id.

use std::sync::Arc;

use tracing::{debug, info, warn};

use questline_types::{
    default_stages, ChannelEvent, ChatMessage, ConversationContext, ConversationError,
    DerivedResources, Role, Stage, StageStatus, GENERATION_STAGE,
};

use crate::api::{ConversationApi, StageResult, StartedGeneration};

/// Drives the conversation toward a final specification.
pub struct ConversationStateMachine {
    api: Arc<dyn ConversationApi>,
    stages: Vec<Stage>,
    context: Option<ConversationContext>,
    transcript: Vec<ChatMessage>,
    /// One command may be in flight at a time; a second is rejected with
    /// `Busy` rather than interleaved.
    in_flight: bool,
    /// Generation latch: set once `generate()` succeeds, making repeat
    /// calls a no-op while the pipeline runs.
    generation_id: Option<String>,
}

impl ConversationStateMachine {
    pub fn new(api: Arc<dyn ConversationApi>) -> Self {
        Self {
            api,
            stages: default_stages(),
            context: None,
            transcript: Vec::new(),
            in_flight: false,
            generation_id: None,
        }
    }

    // ------------------------------------------------------------------
    // Read-only observable state for the UI
    // ------------------------------------------------------------------

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn context(&self) -> Option<&ConversationContext> {
        self.context.as_ref()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    /// Id of the in-flight generation session, if `generate()` ran.
    pub fn generation_id(&self) -> Option<&str> {
        self.generation_id.as_deref()
    }

    // ------------------------------------------------------------------
    // User commands
    // ------------------------------------------------------------------

    /// Request a new conversation session from the server. On success the
    /// server-declared first stage becomes active with progress 0 and
    /// empty stage data. Failures are surfaced, never silently retried.
    pub async fn start(&mut self, initial_prompt: &str) -> Result<(), ConversationError> {
        self.begin_command()?;
        let result = self.api.start(initial_prompt).await;
        self.in_flight = false;

        let started = result.map_err(|e| ConversationError::StartFailed(e.to_string()))?;

        info!(session_id = %started.session_id, first_stage = %started.first_stage, "conversation started");
        self.stages = default_stages();
        self.transcript.clear();
        self.generation_id = None;
        self.transcript
            .push(ChatMessage::new(Role::User, initial_prompt));
        self.context = Some(ConversationContext::new(
            started.session_id,
            started.first_stage.clone(),
        ));
        self.apply_transition(&started.first_stage, None);
        Ok(())
    }

    /// Submit user input for a stage. Empty or whitespace-only text is
    /// rejected locally without a network call. On completion the stage
    /// payload is merged and the server-reported progress adopted.
    pub async fn submit_input(
        &mut self,
        stage: &str,
        text: &str,
    ) -> Result<(), ConversationError> {
        if text.trim().is_empty() {
            return Err(ConversationError::EmptyInput);
        }
        let session_id = self.session_id()?.to_string();
        self.begin_command()?;

        self.transcript.push(ChatMessage::new(Role::User, text));
        let result = self.api.submit_input(&session_id, stage, text).await;
        self.in_flight = false;

        let stage_result = match result {
            Ok(r) => r,
            Err(e) => {
                // the input never reached the stage; take it back out of
                // the transcript so a retry does not duplicate it
                self.transcript.pop();
                return Err(ConversationError::input_failed(stage, e.to_string()));
            }
        };
        self.apply_stage_result(&stage_result);
        Ok(())
    }

    /// Request transition to the next stage. On confirmation the active
    /// marker moves to the server-named stage and per-stage statuses are
    /// recomputed.
    pub async fn advance(&mut self) -> Result<(), ConversationError> {
        let session_id = self.session_id()?.to_string();
        self.begin_command()?;
        let result = self.api.advance(&session_id).await;
        self.in_flight = false;

        let advance = result.map_err(|e| ConversationError::AdvanceFailed(e.to_string()))?;
        self.apply_transition(&advance.to_stage, advance.progress);
        Ok(())
    }

    /// Kick off the generation pipeline. Valid only in the terminal
    /// generation stage, and idempotent: a second call while a pipeline
    /// is in flight returns the existing generation session.
    pub async fn generate(&mut self) -> Result<StartedGeneration, ConversationError> {
        let session_id = self.session_id()?.to_string();
        let current = self
            .context
            .as_ref()
            .map(|c| c.current_stage.clone())
            .unwrap_or_default();
        if current != GENERATION_STAGE {
            return Err(ConversationError::WrongStage {
                expected: GENERATION_STAGE.to_string(),
                actual: current,
            });
        }
        if let Some(id) = &self.generation_id {
            debug!(generation_id = %id, "generate() called with pipeline in flight, no-op");
            return Ok(StartedGeneration {
                generation_id: id.clone(),
                agents: Vec::new(),
                project_id: None,
                sync_endpoint: None,
            });
        }

        self.begin_command()?;
        let result = self.api.generate(&session_id).await;
        self.in_flight = false;

        let started = result.map_err(|e| ConversationError::StartFailed(e.to_string()))?;
        self.generation_id = Some(started.generation_id.clone());
        if let (Some(project_id), Some(sync_endpoint)) =
            (&started.project_id, &started.sync_endpoint)
        {
            if let Some(ctx) = self.context.as_mut() {
                ctx.derived = Some(DerivedResources {
                    project_id: project_id.clone(),
                    sync_endpoint: sync_endpoint.clone(),
                });
            }
        }
        Ok(started)
    }

    /// Reset everything: all stages pending, context and transcript
    /// cleared. The only non-forward transition.
    pub fn restart(&mut self) {
        info!("conversation restarted");
        self.stages = default_stages();
        self.context = None;
        self.transcript.clear();
        self.in_flight = false;
        self.generation_id = None;
    }

    /// Clear the generation latch once the pipeline reached a terminal
    /// state, so a fresh run can be requested.
    pub fn clear_generation_latch(&mut self) {
        self.generation_id = None;
    }

    /// Re-fetch the authoritative context after a delivery gap (e.g. a
    /// channel reconnect). No-op before `start`.
    pub async fn resync(&mut self) -> Result<(), ConversationError> {
        let session_id = match self.context.as_ref() {
            Some(ctx) => ctx.session_id.clone(),
            None => return Ok(()),
        };
        let snapshot = self
            .api
            .snapshot(&session_id)
            .await
            .map_err(|e| ConversationError::AdvanceFailed(e.to_string()))?;
        let stage = snapshot.current_stage.clone();
        let progress = snapshot.progress;
        self.context = Some(snapshot);
        self.apply_transition(&stage, Some(progress));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channel events
    // ------------------------------------------------------------------

    /// Apply a decoded channel event for this conversation. Events for
    /// other session ids are ignored; self- and peer-originated events
    /// are handled identically.
    pub fn apply_event(&mut self, event: &ChannelEvent) {
        let own_session = self.context.as_ref().map(|c| c.session_id.clone());
        match event {
            ChannelEvent::StageProcessed {
                session_id,
                stage,
                result,
                progress,
                response,
            } => {
                if own_session.as_deref() != Some(session_id.as_str()) {
                    return;
                }
                self.apply_stage_result(&StageResult {
                    stage: stage.clone(),
                    result: result.clone(),
                    progress: *progress,
                    response: response.clone(),
                });
            }
            ChannelEvent::StageTransition {
                session_id,
                to_stage,
                progress,
            } => {
                if own_session.as_deref() != Some(session_id.as_str()) {
                    return;
                }
                self.apply_transition(to_stage, *progress);
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Transcript maintenance for streamed assistant messages
    // ------------------------------------------------------------------

    /// Create or grow the streaming transcript entry for `message_id`.
    pub fn upsert_streaming_message(&mut self, message_id: &str, content: &str) {
        match self
            .transcript
            .iter_mut()
            .find(|m| m.id == message_id)
        {
            Some(msg) if msg.is_streaming => {
                msg.content = content.to_string();
            }
            Some(_) => {
                debug!(message_id, "update for finalized message, dropping");
            }
            None => {
                let mut msg = ChatMessage::streaming(message_id);
                msg.content = content.to_string();
                self.transcript.push(msg);
            }
        }
    }

    /// Finalize a streamed message; it becomes immutable.
    pub fn complete_streaming_message(&mut self, message_id: &str, content: &str) {
        self.upsert_streaming_message(message_id, content);
        if let Some(msg) = self.transcript.iter_mut().find(|m| m.id == message_id) {
            msg.is_streaming = false;
        }
    }

    /// Remove the transcript entry for a failed stream, if one was shown.
    pub fn drop_streaming_message(&mut self, message_id: &str) {
        self.transcript
            .retain(|m| !(m.id == message_id && m.is_streaming));
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_command(&mut self) -> Result<(), ConversationError> {
        if self.in_flight {
            return Err(ConversationError::Busy);
        }
        self.in_flight = true;
        Ok(())
    }

    fn session_id(&self) -> Result<&str, ConversationError> {
        self.context
            .as_ref()
            .map(|c| c.session_id.as_str())
            .ok_or(ConversationError::NotStarted)
    }

    fn apply_stage_result(&mut self, result: &StageResult) {
        let Some(ctx) = self.context.as_mut() else {
            warn!(stage = %result.stage, "stage result with no active conversation, dropping");
            return;
        };
        ctx.stage_data
            .insert(result.stage.clone(), result.result.clone());
        ctx.progress = result.progress.min(100);
        if let Some(response) = &result.response {
            self.transcript
                .push(ChatMessage::new(Role::Assistant, response.clone()));
        }
        debug!(stage = %result.stage, progress = result.progress, "stage result merged");
    }

    /// Move the active marker to `to_stage` and recompute every stage
    /// status: completed before, active at, pending after. A server-named
    /// stage missing from the local list is appended, not rejected.
    fn apply_transition(&mut self, to_stage: &str, progress: Option<u8>) {
        let idx = match self.stages.iter().position(|s| s.id == to_stage) {
            Some(idx) => idx,
            None => {
                info!(stage = %to_stage, "server named an unknown stage, appending");
                self.stages.push(Stage::pending(to_stage, to_stage));
                self.stages.len() - 1
            }
        };
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.status = match i.cmp(&idx) {
                std::cmp::Ordering::Less => StageStatus::Completed,
                std::cmp::Ordering::Equal => StageStatus::Active,
                std::cmp::Ordering::Greater => StageStatus::Pending,
            };
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.current_stage = to_stage.to_string();
            if let Some(p) = progress {
                ctx.progress = p.min(100);
            }
        }
    }
}
