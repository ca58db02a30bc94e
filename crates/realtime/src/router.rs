// crates/realtime/src/router.rs
//! Single dispatch point for inbound channel frames.
//!
//! Every frame is decoded exactly once at this boundary and applied to
//! the state machine that owns its slice of state. UI layers observe
//! coarse [`StateUpdate`] signals and re-read the machines they care
//! about.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use questline_core::{
    ConversationStateMachine, GenerationProgressAggregator, NotificationRouter,
    SessionLifecycleManager, StreamAssembler, StreamUpdate,
};
use questline_core::api::StartedGeneration;
use questline_types::{
    agent_chat_channel, conversation_channel, decode_event, ChannelEvent, Frame,
    SESSION_UPDATES_CHANNEL,
};

use crate::channel::{ConnectionState, EventChannel, SubscriptionId};

/// Which slice of client state changed. Observers re-read the
/// corresponding machine through the router's accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    Conversation,
    Transcript,
    Generation,
    Sessions,
}

#[derive(Clone)]
pub struct EventRouter {
    channel: EventChannel,
    conversation: Arc<RwLock<ConversationStateMachine>>,
    sessions: Arc<RwLock<SessionLifecycleManager>>,
    /// At most one generation pipeline is tracked at a time.
    generation: Arc<RwLock<Option<GenerationProgressAggregator>>>,
    streams: Arc<RwLock<StreamAssembler>>,
    notices: NotificationRouter,
    updates: broadcast::Sender<StateUpdate>,
}

impl EventRouter {
    pub fn new(
        channel: EventChannel,
        conversation: ConversationStateMachine,
        sessions: SessionLifecycleManager,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            channel,
            conversation: Arc::new(RwLock::new(conversation)),
            sessions: Arc::new(RwLock::new(sessions)),
            generation: Arc::new(RwLock::new(None)),
            streams: Arc::new(RwLock::new(StreamAssembler::new())),
            notices: NotificationRouter::default(),
            updates,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn conversation(&self) -> Arc<RwLock<ConversationStateMachine>> {
        self.conversation.clone()
    }

    pub fn sessions(&self) -> Arc<RwLock<SessionLifecycleManager>> {
        self.sessions.clone()
    }

    pub fn generation(&self) -> Arc<RwLock<Option<GenerationProgressAggregator>>> {
        self.generation.clone()
    }

    pub fn notices(&self) -> NotificationRouter {
        self.notices.clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StateUpdate> {
        self.updates.subscribe()
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Subscribe to both channels of one conversation and dispatch their
    /// frames until unsubscribed.
    pub async fn watch_conversation(&self, conversation_id: &str) -> Vec<SubscriptionId> {
        let mut ids = Vec::with_capacity(2);
        for topic in [
            conversation_channel(conversation_id),
            agent_chat_channel(conversation_id),
        ] {
            let (id, rx) = self.channel.subscribe(&topic).await;
            self.spawn_dispatch(rx);
            ids.push(id);
        }
        info!(conversation_id, "watching conversation channels");
        ids
    }

    /// Subscribe to the shared session-updates channel.
    pub async fn watch_sessions(&self) -> SubscriptionId {
        let (id, rx) = self.channel.subscribe(SESSION_UPDATES_CHANNEL).await;
        self.spawn_dispatch(rx);
        id
    }

    pub async fn unwatch(&self, ids: impl IntoIterator<Item = SubscriptionId>) {
        for id in ids {
            self.channel.unsubscribe(id).await;
        }
    }

    /// Re-pull authoritative state whenever the channel comes back after
    /// a gap: pushed events may have been missed while disconnected.
    pub fn spawn_resync_watcher(&self) {
        let router = self.clone();
        let mut state = self.channel.state();
        tokio::spawn(async move {
            let mut was_connected = *state.borrow() == ConnectionState::Connected;
            while state.changed().await.is_ok() {
                let connected = *state.borrow_and_update() == ConnectionState::Connected;
                if connected && !was_connected {
                    router.resync().await;
                }
                was_connected = connected;
            }
        });
    }

    async fn resync(&self) {
        info!("channel reconnected, resyncing authoritative state");
        if let Err(e) = self.conversation.write().await.resync().await {
            warn!("conversation resync failed: {e}");
        }
        if let Err(e) = self.sessions.write().await.resync().await {
            warn!("session resync failed: {e}");
        }
        self.emit(StateUpdate::Conversation);
        self.emit(StateUpdate::Sessions);
    }

    fn spawn_dispatch(&self, mut rx: mpsc::UnboundedReceiver<Frame>) {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                router.handle_frame(frame).await;
            }
        });
    }

    // ------------------------------------------------------------------
    // Generation pipeline tracking
    // ------------------------------------------------------------------

    /// Start tracking a freshly launched pipeline. Replaces any previous
    /// (necessarily terminal) tracker.
    pub async fn begin_generation(&self, started: &StartedGeneration) {
        let mut generation = self.generation.write().await;
        *generation = Some(GenerationProgressAggregator::new(
            &started.generation_id,
            &started.agents,
        ));
        drop(generation);
        self.emit(StateUpdate::Generation);
    }

    /// User-initiated cancellation of the tracked pipeline.
    pub async fn cancel_generation(&self) {
        let mut generation = self.generation.write().await;
        if let Some(aggregator) = generation.as_mut() {
            aggregator.cancel();
        }
        drop(generation);
        self.conversation.write().await.clear_generation_latch();
        self.emit(StateUpdate::Generation);
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Decode and apply one inbound frame. Malformed payloads for known
    /// events and unknown event names are dropped here, never deeper.
    pub async fn handle_frame(&self, frame: Frame) {
        let event = match decode_event(&frame.event, &frame.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %frame.channel, "dropping malformed event: {e}");
                return;
            }
        };

        match event {
            ChannelEvent::StageProcessed { .. } | ChannelEvent::StageTransition { .. } => {
                self.conversation.write().await.apply_event(&event);
                self.emit(StateUpdate::Conversation);
            }

            ChannelEvent::StreamStart { ref message_id } => {
                if let Some(StreamUpdate::Opened { .. }) =
                    self.streams.write().await.on_start(message_id)
                {
                    self.conversation
                        .write()
                        .await
                        .upsert_streaming_message(message_id, "");
                    self.emit(StateUpdate::Transcript);
                }
            }
            ChannelEvent::StreamToken {
                ref message_id,
                ref token,
            } => {
                if let Some(StreamUpdate::Appended { content, .. }) =
                    self.streams.write().await.on_token(message_id, token)
                {
                    self.conversation
                        .write()
                        .await
                        .upsert_streaming_message(message_id, &content);
                    self.emit(StateUpdate::Transcript);
                }
            }
            ChannelEvent::StreamEnd {
                ref message_id,
                ref final_content,
            } => {
                if let Some(StreamUpdate::Completed { content, .. }) = self
                    .streams
                    .write()
                    .await
                    .on_end(message_id, final_content.clone())
                {
                    self.conversation
                        .write()
                        .await
                        .complete_streaming_message(message_id, &content);
                    self.emit(StateUpdate::Transcript);
                }
            }
            ChannelEvent::StreamError {
                ref message_id,
                ref error,
            } => {
                if let Some(StreamUpdate::Failed { .. }) = self
                    .streams
                    .write()
                    .await
                    .on_error(message_id, error)
                {
                    self.conversation
                        .write()
                        .await
                        .drop_streaming_message(message_id);
                    self.notices.route(&event);
                    self.emit(StateUpdate::Transcript);
                }
            }

            ChannelEvent::ContentProgress {
                ref session_id,
                ref agent_id,
                ref kind,
                status,
                progress,
                ref current_task,
                ref metrics,
                ref warning,
            } => {
                let mut generation = self.generation.write().await;
                match generation.as_mut() {
                    Some(aggregator) if aggregator.id() == session_id => {
                        aggregator.on_progress(
                            agent_id,
                            kind.as_deref(),
                            status,
                            progress,
                            current_task.clone(),
                            metrics.clone(),
                            warning.clone(),
                        );
                        drop(generation);
                        self.emit(StateUpdate::Generation);
                    }
                    _ => debug!(session_id, "progress for untracked pipeline, dropping"),
                }
            }
            ChannelEvent::ContentComplete {
                ref session_id,
                ref agent_id,
            } => {
                let mut generation = self.generation.write().await;
                match generation.as_mut() {
                    Some(aggregator) if aggregator.id() == session_id => {
                        aggregator.on_agent_complete(agent_id);
                        drop(generation);
                        self.emit(StateUpdate::Generation);
                    }
                    _ => debug!(session_id, "completion for untracked pipeline, dropping"),
                }
            }
            ChannelEvent::ContentError {
                ref session_id,
                ref agent_id,
                ref error,
            } => {
                let mut generation = self.generation.write().await;
                match generation.as_mut() {
                    Some(aggregator) if aggregator.id() == session_id => {
                        aggregator.on_error(agent_id, error);
                        drop(generation);
                        self.notices.route(&event);
                        self.conversation.write().await.clear_generation_latch();
                        self.emit(StateUpdate::Generation);
                    }
                    _ => debug!(session_id, "error for untracked pipeline, dropping"),
                }
            }
            ChannelEvent::GenerationComplete {
                ref session_id,
                ref output,
            } => {
                let mut generation = self.generation.write().await;
                match generation.as_mut() {
                    Some(aggregator) if aggregator.id() == session_id => {
                        aggregator.on_complete(output.clone());
                        drop(generation);
                        self.notices.route(&event);
                        self.conversation.write().await.clear_generation_latch();
                        self.emit(StateUpdate::Generation);
                    }
                    _ => debug!(session_id, "completion for untracked pipeline, dropping"),
                }
            }
            ChannelEvent::AssetsUploaded { .. } => {
                self.notices.route(&event);
            }

            ChannelEvent::SessionUpdate { session } => {
                self.sessions.write().await.apply_update(session);
                self.emit(StateUpdate::Sessions);
            }
            ChannelEvent::SessionStatus {
                session_id,
                status,
                metrics,
                students,
                awards,
            } => {
                let awards = self.sessions.write().await.apply_status(
                    &session_id,
                    status,
                    metrics,
                    students,
                    awards,
                );
                for award in &awards {
                    self.notices.post_award(award);
                }
                self.emit(StateUpdate::Sessions);
            }

            ChannelEvent::Unknown { event, .. } => {
                debug!(event, "unknown event dropped");
            }
        }
    }

    fn emit(&self, update: StateUpdate) {
        let _ = self.updates.send(update);
    }
}
