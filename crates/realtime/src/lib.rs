// crates/realtime/src/lib.rs
//! Realtime channel transport and event dispatch.
//!
//! [`EventChannel`] keeps a single reconnecting WebSocket to the
//! platform's push gateway and fans inbound frames out to topic
//! subscriptions. [`EventRouter`] owns the client-side state machines
//! and applies every decoded event to exactly one of them.

pub mod channel;
pub mod config;
pub mod router;

pub use channel::{ConnectionState, EventChannel, SubscriptionId};
pub use config::ChannelConfig;
pub use router::{EventRouter, StateUpdate};
