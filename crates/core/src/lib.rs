// crates/core/src/lib.rs
//! Pure state machines for the questline real-time core.
//!
//! Every component here is driven exclusively by decoded channel events
//! and explicit user commands — no polling, no transport access. Network
//! calls go through the [`api`] trait seams so each machine is testable
//! with in-memory mocks.

pub mod api;
pub mod conversation;
pub mod generation;
pub mod notify;
pub mod session;
pub mod stream;

pub use api::*;
pub use conversation::ConversationStateMachine;
pub use generation::GenerationProgressAggregator;
pub use notify::{NotificationRouter, NoticeEvent};
pub use session::SessionLifecycleManager;
pub use stream::{StreamAssembler, StreamUpdate};
