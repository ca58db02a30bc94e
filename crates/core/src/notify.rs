// crates/core/src/notify.rs
//! Channel-event to user-notice routing with a bounded visible queue.
//!
//! At most `capacity` notices are visible at once; posting past that
//! evicts the oldest lowest-priority notice. Duration-bound notices
//! self-expire on a spawned timer which is aborted on early dismissal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use questline_types::{Award, ChannelEvent, Notice, NoticeCategory, NoticePriority};

const DEFAULT_CAPACITY: usize = 5;
const AWARD_DURATION_MS: u64 = 4_000;
const ASSETS_DURATION_MS: u64 = 6_000;

/// Emitted on the feed whenever the visible queue changes.
#[derive(Debug, Clone)]
pub enum NoticeEvent {
    Posted(Notice),
    Dismissed(String),
    Expired(String),
}

struct Inner {
    visible: Vec<Notice>,
    capacity: usize,
    timers: HashMap<String, JoinHandle<()>>,
    feed: broadcast::Sender<NoticeEvent>,
}

impl Inner {
    /// Remove a notice, abort its expiry timer, and announce the removal.
    fn remove(&mut self, notice_id: &str, make_event: fn(String) -> NoticeEvent) -> bool {
        let Some(idx) = self.visible.iter().position(|n| n.id == notice_id) else {
            return false;
        };
        self.visible.remove(idx);
        if let Some(timer) = self.timers.remove(notice_id) {
            timer.abort();
        }
        let _ = self.feed.send(make_event(notice_id.to_string()));
        true
    }

    /// Oldest notice of the lowest priority present. The queue is in
    /// arrival order, so the first match is the oldest.
    fn eviction_candidate(&self) -> Option<String> {
        let lowest = self.visible.iter().map(|n| n.priority).min()?;
        self.visible
            .iter()
            .find(|n| n.priority == lowest)
            .map(|n| n.id.clone())
    }
}

#[derive(Clone)]
pub struct NotificationRouter {
    inner: Arc<Mutex<Inner>>,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NotificationRouter {
    pub fn with_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                visible: Vec::new(),
                capacity,
                timers: HashMap::new(),
                feed,
            })),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoticeEvent> {
        self.inner.lock().unwrap().feed.subscribe()
    }

    pub fn visible(&self) -> Vec<Notice> {
        self.inner.lock().unwrap().visible.clone()
    }

    /// Post a notice, evicting the oldest lowest-priority notice if the
    /// queue is full. Must run inside a tokio runtime when the notice
    /// carries a duration.
    pub fn post(&self, notice: Notice) {
        let mut inner = self.inner.lock().unwrap();
        if inner.visible.len() >= inner.capacity {
            if let Some(victim) = inner.eviction_candidate() {
                debug!(notice_id = %victim, "evicting notice to make room");
                inner.remove(&victim, NoticeEvent::Dismissed);
            }
        }
        if let Some(ms) = notice.duration_ms {
            let router = self.clone();
            let id = notice.id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                router.expire(&id);
            });
            inner.timers.insert(notice.id.clone(), timer);
        }
        let _ = inner.feed.send(NoticeEvent::Posted(notice.clone()));
        inner.visible.push(notice);
    }

    /// User-initiated removal. Cancels any pending expiry timer.
    pub fn dismiss(&self, notice_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .remove(notice_id, NoticeEvent::Dismissed)
    }

    fn expire(&self, notice_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .remove(notice_id, NoticeEvent::Expired);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        for (_, timer) in inner.timers.drain() {
            timer.abort();
        }
        for notice in inner.visible.drain(..) {
            let _ = inner.feed.send(NoticeEvent::Dismissed(notice.id));
        }
    }

    /// Map a channel event to zero or more notices. Events with no
    /// user-facing meaning pass through silently.
    pub fn route(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::GenerationComplete { .. } => {
                self.post(Notice::new(
                    NoticeCategory::MissionComplete,
                    NoticePriority::High,
                    "Your content is ready",
                ));
            }
            ChannelEvent::ContentError { agent_id, error, .. } => {
                self.post(
                    Notice::new(
                        NoticeCategory::Generic,
                        NoticePriority::High,
                        format!("Generation problem ({agent_id})"),
                    )
                    .with_body(error.clone()),
                );
            }
            ChannelEvent::StreamError { error, .. } => {
                self.post(
                    Notice::new(
                        NoticeCategory::Generic,
                        NoticePriority::High,
                        "Message failed",
                    )
                    .with_body(error.clone()),
                );
            }
            ChannelEvent::AssetsUploaded { asset_count, .. } => {
                let title = match asset_count {
                    Some(n) => format!("{n} assets uploaded"),
                    None => "Assets uploaded".to_string(),
                };
                self.post(
                    Notice::new(NoticeCategory::Generic, NoticePriority::Normal, title)
                        .with_duration_ms(ASSETS_DURATION_MS),
                );
            }
            ChannelEvent::SessionStatus { awards, .. } => {
                for award in awards {
                    self.post_award(award);
                }
            }
            _ => {}
        }
    }

    pub fn post_award(&self, award: &Award) {
        let category = match award.kind.as_str() {
            "xp_gain" => NoticeCategory::XpGain,
            "achievement" => NoticeCategory::Achievement,
            "level_up" => NoticeCategory::LevelUp,
            "badge" => NoticeCategory::Badge,
            "mission_complete" => NoticeCategory::MissionComplete,
            other => {
                debug!(kind = other, "unknown award kind, using generic notice");
                NoticeCategory::Generic
            }
        };
        let mut notice = Notice::new(category, NoticePriority::Normal, award.label.clone())
            .with_duration_ms(AWARD_DURATION_MS);
        if let Some(amount) = award.amount {
            notice = notice.with_body(format!("+{amount}"));
        }
        self.post(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plain(priority: NoticePriority, title: &str) -> Notice {
        Notice::new(NoticeCategory::Generic, priority, title)
    }

    #[tokio::test]
    async fn test_post_and_dismiss() {
        let router = NotificationRouter::default();
        let notice = plain(NoticePriority::Normal, "hello");
        let id = notice.id.clone();
        router.post(notice);
        assert_eq!(router.visible().len(), 1);

        assert!(router.dismiss(&id));
        assert!(router.visible().is_empty());
        assert!(!router.dismiss(&id));
    }

    #[tokio::test]
    async fn test_eviction_takes_oldest_lowest_priority() {
        let router = NotificationRouter::with_capacity(3);
        let low_old = plain(NoticePriority::Low, "low-old");
        let low_old_id = low_old.id.clone();
        router.post(low_old);
        router.post(plain(NoticePriority::High, "high"));
        router.post(plain(NoticePriority::Low, "low-new"));

        router.post(plain(NoticePriority::Normal, "overflow"));

        let titles: Vec<_> = router.visible().iter().map(|n| n.title.clone()).collect();
        assert_eq!(titles, vec!["high", "low-new", "overflow"]);
        assert!(router.visible().iter().all(|n| n.id != low_old_id));
    }

    #[tokio::test]
    async fn test_eviction_when_all_high_takes_oldest() {
        let router = NotificationRouter::with_capacity(2);
        router.post(plain(NoticePriority::High, "first"));
        router.post(plain(NoticePriority::High, "second"));
        router.post(plain(NoticePriority::High, "third"));

        let titles: Vec<_> = router.visible().iter().map(|n| n.title.clone()).collect();
        assert_eq!(titles, vec!["second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_notice_expires() {
        let router = NotificationRouter::default();
        router.post(plain(NoticePriority::Normal, "toast").with_duration_ms(1_000));
        assert_eq!(router.visible().len(), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;
        assert!(router.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_dismiss_cancels_expiry() {
        let router = NotificationRouter::default();
        let mut feed = router.subscribe();
        let notice = plain(NoticePriority::Normal, "toast").with_duration_ms(1_000);
        let id = notice.id.clone();
        router.post(notice);
        assert!(router.dismiss(&id));

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        tokio::task::yield_now().await;

        // Posted then Dismissed, never Expired
        assert!(matches!(feed.try_recv(), Ok(NoticeEvent::Posted(_))));
        assert!(matches!(feed.try_recv(), Ok(NoticeEvent::Dismissed(_))));
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_generation_complete() {
        let router = NotificationRouter::default();
        router.route(&ChannelEvent::GenerationComplete {
            session_id: "s1".into(),
            output: None,
        });
        let visible = router.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].category, NoticeCategory::MissionComplete);
        assert_eq!(visible[0].priority, NoticePriority::High);
    }

    #[tokio::test]
    async fn test_route_awards_maps_kinds() {
        let router = NotificationRouter::default();
        router.post_award(&Award {
            kind: "xp_gain".into(),
            label: "Quest complete".into(),
            amount: Some(50),
        });
        router.post_award(&Award {
            kind: "mystery".into(),
            label: "???".into(),
            amount: None,
        });

        let visible = router.visible();
        assert_eq!(visible[0].category, NoticeCategory::XpGain);
        assert_eq!(visible[0].body.as_deref(), Some("+50"));
        assert_eq!(visible[1].category, NoticeCategory::Generic);
    }

    #[tokio::test]
    async fn test_stream_error_routes_high_priority_notice() {
        let router = NotificationRouter::default();
        router.route(&ChannelEvent::StreamError {
            message_id: "m1".into(),
            error: "upstream timeout".into(),
        });
        let visible = router.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].body.as_deref(), Some("upstream timeout"));
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let router = NotificationRouter::default();
        router.post(plain(NoticePriority::Normal, "a"));
        router.post(plain(NoticePriority::Normal, "b").with_duration_ms(5_000));
        router.clear();
        assert!(router.visible().is_empty());
    }
}
