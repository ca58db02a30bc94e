// crates/realtime/src/channel.rs
//! Reconnecting WebSocket client that multiplexes topic subscriptions
//! over a single connection to the push gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use uuid::Uuid;

use questline_types::{ChannelError, Frame};

use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Subscription {
    topic: String,
    tx: mpsc::UnboundedSender<Frame>,
}

type SubscriptionMap = Arc<RwLock<HashMap<SubscriptionId, Subscription>>>;

/// Frames the client sends upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish(Frame),
}

/// Cloneable handle to the channel task. Subscriptions survive
/// reconnects: every registered topic is re-announced on the new
/// connection before any inbound frame is delivered.
#[derive(Clone)]
pub struct EventChannel {
    subs: SubscriptionMap,
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl EventChannel {
    /// Spawn the connection task and return a handle. With no URL
    /// configured the task exits immediately and the channel stays
    /// permanently disconnected.
    pub fn spawn(config: ChannelConfig) -> Self {
        let subs: SubscriptionMap = Arc::new(RwLock::new(HashMap::new()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(config, subs.clone(), state_tx, outbound_rx));
        Self {
            subs,
            state: state_rx,
            outbound: outbound_tx,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Watch connection transitions (used to trigger post-reconnect
    /// resyncs).
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Register interest in a topic. Frames whose `channel` matches are
    /// delivered in arrival order on the returned receiver.
    pub async fn subscribe(&self, topic: &str) -> (SubscriptionId, mpsc::UnboundedReceiver<Frame>) {
        let id = SubscriptionId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subs.write().await;
        let already_announced = subs.values().any(|s| s.topic == topic);
        subs.insert(
            id,
            Subscription {
                topic: topic.to_string(),
                tx,
            },
        );
        drop(subs);

        if !already_announced && self.is_connected() {
            let _ = self.outbound.send(ClientFrame::Subscribe {
                channel: topic.to_string(),
            });
        }
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subs.write().await;
        let Some(removed) = subs.remove(&id) else {
            return;
        };
        let topic_still_used = subs.values().any(|s| s.topic == removed.topic);
        drop(subs);

        if !topic_still_used && self.is_connected() {
            let _ = self.outbound.send(ClientFrame::Unsubscribe {
                channel: removed.topic,
            });
        }
    }

    /// Publish a frame upstream. Fails fast while disconnected; nothing
    /// is queued for later delivery.
    pub fn send(
        &self,
        topic: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Unavailable);
        }
        self.outbound
            .send(ClientFrame::Publish(Frame {
                channel: topic.to_string(),
                event: event.to_string(),
                payload,
            }))
            .map_err(|_| ChannelError::Closed)
    }
}

async fn run(
    config: ChannelConfig,
    subs: SubscriptionMap,
    state_tx: watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
) {
    let Some(url) = config.url.clone() else {
        info!("QUESTLINE_WS_URL not set — realtime channel disabled");
        return;
    };

    let mut backoff = Duration::from_secs(1);

    loop {
        match connect_and_stream(&url, &subs, &state_tx, &mut outbound_rx, &config).await {
            Ok(()) => {
                info!("channel connection closed cleanly");
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                warn!(backoff_secs = backoff.as_secs(), "channel connection failed: {e}");
            }
        }
        let _ = state_tx.send(ConnectionState::Disconnected);

        if outbound_rx.is_closed() {
            info!("all channel handles dropped, stopping");
            return;
        }
        // frames queued against the dead connection are stale
        while outbound_rx.try_recv().is_ok() {}

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_reconnect_delay);
    }
}

async fn connect_and_stream(
    url: &str,
    subs: &SubscriptionMap,
    state_tx: &watch::Sender<ConnectionState>,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
    config: &ChannelConfig,
) -> Result<(), String> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| format!("WS connect failed: {e}"))?;

    let (mut sink, mut stream) = ws_stream.split();

    // Re-announce every registered topic before the connection is marked
    // live: no inbound frame may reach a subscriber whose subscription
    // the gateway has not yet seen.
    let mut topics: Vec<String> = {
        let subs = subs.read().await;
        subs.values().map(|s| s.topic.clone()).collect()
    };
    topics.sort();
    topics.dedup();
    for topic in topics {
        let text = serde_json::to_string(&ClientFrame::Subscribe { channel: topic })
            .map_err(|e| format!("encode failed: {e}"))?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| format!("subscribe send failed: {e}"))?;
    }

    let _ = state_tx.send(ConnectionState::Connected);
    info!(%url, "channel connected");

    // A persistent ticker keeps pings flowing even while inbound and
    // outbound traffic is busy. The first tick fires immediately and is
    // swallowed.
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        let text = serde_json::to_string(&frame)
                            .map_err(|e| format!("encode failed: {e}"))?;
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            return Err("outbound send failed".to_string());
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    return Ok(());
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => deliver(subs, &text).await,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(format!("stream error: {e}")),
                }
            }
        }
    }
}

/// Route one inbound frame to every subscription on its channel.
/// Undecodable frames are dropped at this boundary; dead receivers are
/// pruned from the registry.
async fn deliver(subs: &SubscriptionMap, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("undecodable frame dropped: {e}");
            return;
        }
    };

    let mut dead = Vec::new();
    {
        let subs = subs.read().await;
        for (id, sub) in subs.iter() {
            if sub.topic == frame.channel && sub.tx.send(frame.clone()).is_err() {
                dead.push(*id);
            }
        }
    }
    if !dead.is_empty() {
        let mut subs = subs.write().await;
        for id in dead {
            subs.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn disabled_channel() -> EventChannel {
        EventChannel::spawn(ChannelConfig {
            url: None,
            ..ChannelConfig::default()
        })
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_fast() {
        let channel = disabled_channel();
        let err = channel
            .send("conversation-1", "user_input", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Unavailable));
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe_registry() {
        let channel = disabled_channel();
        let (id, _rx) = channel.subscribe("session-updates").await;
        assert_eq!(channel.subs.read().await.len(), 1);
        channel.unsubscribe(id).await;
        assert!(channel.subs.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_matches_topic_only() {
        let channel = disabled_channel();
        let (_id, mut rx_a) = channel.subscribe("conversation-a").await;
        let (_id, mut rx_b) = channel.subscribe("conversation-b").await;

        let frame = Frame {
            channel: "conversation-a".to_string(),
            event: "stage_transition".to_string(),
            payload: serde_json::json!({"sessionId": "a", "toStage": "discovery"}),
        };
        deliver(&channel.subs, &serde_json::to_string(&frame).unwrap()).await;

        assert_eq!(rx_a.try_recv().unwrap().event, "stage_transition");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_drops_undecodable_frame() {
        let channel = disabled_channel();
        let (_id, mut rx) = channel.subscribe("conversation-a").await;
        deliver(&channel.subs, "not json at all").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_prunes_dead_receivers() {
        let channel = disabled_channel();
        let (_id, rx) = channel.subscribe("conversation-a").await;
        drop(rx);

        let frame = Frame {
            channel: "conversation-a".to_string(),
            event: "stream_start".to_string(),
            payload: serde_json::json!({"messageId": "m1"}),
        };
        deliver(&channel.subs, &serde_json::to_string(&frame).unwrap()).await;
        assert!(channel.subs.read().await.is_empty());
    }

    #[test]
    fn test_client_frame_wire_shape() {
        let text = serde_json::to_string(&ClientFrame::Subscribe {
            channel: "session-updates".to_string(),
        })
        .unwrap();
        let val: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(val["type"], "subscribe");
        assert_eq!(val["channel"], "session-updates");
    }
}
