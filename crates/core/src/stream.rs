// crates/core/src/stream.rs
//! Reassembles token-framed assistant messages.
//!
//! Per logical message id the state is `Streaming -> Complete` or
//! `Streaming -> Errored`, both terminal. Consumers observe monotonically
//! growing content for streaming messages; content never shrinks or
//! reorders within one id, and completed content is immutable.

use std::collections::HashMap;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Complete,
    Errored,
}

struct StreamEntry {
    state: StreamState,
    buffer: String,
}

/// Result of feeding one stream event into the assembler. The router
/// turns these into transcript updates and failure notices.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// A new message opened; an empty streaming transcript entry should
    /// appear.
    Opened { message_id: String },
    /// The message grew. `content` is the full assembled text so far.
    Appended { message_id: String, content: String },
    /// Terminal: the message is complete and immutable.
    Completed { message_id: String, content: String },
    /// Terminal: the stream failed. The buffer is discarded; this is a
    /// system-level failure, not assistant content.
    Failed { message_id: String, error: String },
}

/// Stream reassembly for all in-flight messages on one channel.
#[derive(Default)]
pub struct StreamAssembler {
    streams: HashMap<String, StreamEntry>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit stream open. Tokens for unknown ids implicitly open a
    /// stream, so this mainly lets the UI show an empty bubble early.
    pub fn on_start(&mut self, message_id: &str) -> Option<StreamUpdate> {
        match self.streams.get(message_id) {
            Some(entry) if entry.state != StreamState::Streaming => {
                debug!(message_id, "stream_start for terminal stream, dropping");
                None
            }
            Some(_) => None, // duplicate start, already streaming
            None => {
                self.streams.insert(
                    message_id.to_string(),
                    StreamEntry {
                        state: StreamState::Streaming,
                        buffer: String::new(),
                    },
                );
                Some(StreamUpdate::Opened {
                    message_id: message_id.to_string(),
                })
            }
        }
    }

    /// Append one fragment in arrival order. Creates the stream if no
    /// in-flight message exists for this id.
    pub fn on_token(&mut self, message_id: &str, fragment: &str) -> Option<StreamUpdate> {
        let entry = self
            .streams
            .entry(message_id.to_string())
            .or_insert_with(|| StreamEntry {
                state: StreamState::Streaming,
                buffer: String::new(),
            });

        if entry.state != StreamState::Streaming {
            debug!(message_id, "token for terminal stream, dropping");
            return None;
        }

        entry.buffer.push_str(fragment);
        Some(StreamUpdate::Appended {
            message_id: message_id.to_string(),
            content: entry.buffer.clone(),
        })
    }

    /// Terminating frame. An explicit `final_content` authoritatively
    /// replaces the assembled buffer; otherwise the buffer stands.
    pub fn on_end(
        &mut self,
        message_id: &str,
        final_content: Option<String>,
    ) -> Option<StreamUpdate> {
        let entry = self
            .streams
            .entry(message_id.to_string())
            .or_insert_with(|| StreamEntry {
                state: StreamState::Streaming,
                buffer: String::new(),
            });

        if entry.state != StreamState::Streaming {
            debug!(message_id, "stream_end for terminal stream, dropping");
            return None;
        }

        if let Some(content) = final_content {
            entry.buffer = content;
        }
        entry.state = StreamState::Complete;
        Some(StreamUpdate::Completed {
            message_id: message_id.to_string(),
            content: entry.buffer.clone(),
        })
    }

    /// Mid-stream failure. The buffer is discarded.
    pub fn on_error(&mut self, message_id: &str, error: &str) -> Option<StreamUpdate> {
        match self.streams.get_mut(message_id) {
            Some(entry) if entry.state == StreamState::Streaming => {
                entry.state = StreamState::Errored;
                entry.buffer.clear();
                Some(StreamUpdate::Failed {
                    message_id: message_id.to_string(),
                    error: error.to_string(),
                })
            }
            Some(_) => {
                debug!(message_id, "stream_error for terminal stream, dropping");
                None
            }
            None => {
                // Error for a stream we never saw a token for. Still
                // surface it — the message failed before producing output.
                warn!(message_id, error, "stream errored before any token arrived");
                self.streams.insert(
                    message_id.to_string(),
                    StreamEntry {
                        state: StreamState::Errored,
                        buffer: String::new(),
                    },
                );
                Some(StreamUpdate::Failed {
                    message_id: message_id.to_string(),
                    error: error.to_string(),
                })
            }
        }
    }

    /// Assembled content so far (None for unknown or errored ids).
    pub fn content(&self, message_id: &str) -> Option<&str> {
        self.streams.get(message_id).and_then(|e| match e.state {
            StreamState::Errored => None,
            _ => Some(e.buffer.as_str()),
        })
    }

    /// Whether this id reached a terminal state.
    pub fn is_terminal(&self, message_id: &str) -> bool {
        self.streams
            .get(message_id)
            .map(|e| e.state != StreamState::Streaming)
            .unwrap_or(false)
    }

    /// Drop terminal entries (called when a conversation is cleared).
    pub fn clear(&mut self) {
        self.streams.clear();
    }
}
