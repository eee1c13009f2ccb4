use std::{num::NonZeroUsize, time::Duration};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Updates repeating the current identity within this window are dropped
const DUPLICATE_WINDOW: Duration = Duration::from_secs(1);

/// The app and activity in front, as far as the engine knows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopActivity {
    pub app_id: String,
    pub activity_id: Option<String>,
    /// Bumped each time the same activity is entered again
    pub number: u32,
}

impl TopActivity {
    pub fn new(app_id: impl Into<String>, activity_id: Option<String>) -> Self {
        TopActivity {
            app_id: app_id.into(),
            activity_id,
            number: 0,
        }
    }

    fn same_place(&self, app_id: &str, activity_id: Option<&str>) -> bool {
        self.app_id == app_id && self.activity_id.as_deref() == activity_id
    }
}

/// Single writer of the current identity
#[derive(Debug, Default)]
pub struct IdentityTracker {
    current: Option<TopActivity>,
    updated_at: Option<Instant>,
}

impl IdentityTracker {
    pub fn current(&self) -> Option<&TopActivity> {
        self.current.as_ref()
    }

    /// Without an activity the last one known for the same app still holds
    fn fill_activity(&self, app_id: &str, activity_id: Option<&str>) -> Option<String> {
        match (activity_id, &self.current) {
            (Some(a), _) => Some(a.to_string()),
            (None, Some(c)) if c.app_id == app_id => c.activity_id.clone(),
            (None, _) => None,
        }
    }

    /// An activity was reported in front; returns whether the identity changed
    pub fn enter_activity(&mut self, app_id: &str, activity_id: Option<&str>, now: Instant) -> bool {
        let activity_id = self.fill_activity(app_id, activity_id);

        let next = match &self.current {
            Some(c) if c.same_place(app_id, activity_id.as_deref()) => {
                let recent = self
                    .updated_at
                    .map_or(false, |at| now.saturating_duration_since(at) < DUPLICATE_WINDOW);
                if recent {
                    return false;
                }
                TopActivity {
                    number: c.number + 1,
                    ..c.clone()
                }
            }
            _ => TopActivity::new(app_id, activity_id),
        };
        self.current = Some(next);
        self.updated_at = Some(now);
        true
    }

    /// A polled answer to which activity is in front. Agreeing with the current identity is
    /// not a re-entry, so `number` stays put.
    pub fn confirm(&mut self, app_id: &str, activity_id: Option<&str>, now: Instant) -> bool {
        let activity_id = self.fill_activity(app_id, activity_id);
        if self
            .current
            .as_ref()
            .map_or(false, |c| c.same_place(app_id, activity_id.as_deref()))
        {
            return false;
        }
        self.current = Some(TopActivity::new(app_id, activity_id));
        self.updated_at = Some(now);
        true
    }

    /// The cheap source reports `app_id` in front; only a different app changes anything
    pub fn observe_app(&mut self, app_id: &str, now: Instant) -> bool {
        if self.current.as_ref().map_or(false, |c| c.app_id == app_id) {
            return false;
        }
        self.current = Some(TopActivity::new(app_id, None));
        self.updated_at = Some(now);
        true
    }
}

/// Memo of which (app, class name) pairs are activities
///
/// Process scoped: constructed once by the embedding host and shared with every scheduler.
pub struct ActivityTable {
    known: Mutex<LruCache<(String, String), bool>>,
}

impl ActivityTable {
    pub fn new(capacity: NonZeroUsize) -> Self {
        ActivityTable {
            known: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    /// Answer from the memo, asking `lookup` on a miss
    pub fn is_activity(&self, app_id: &str, class_name: &str, lookup: impl FnOnce() -> bool) -> bool {
        let key = (app_id.to_string(), class_name.to_string());
        if let Some(known) = self.known.lock().get(&key) {
            return *known;
        }
        // the host lookup may be slow, don't hold the lock over it
        let answer = lookup();
        self.known.lock().put(key, answer);
        answer
    }

    pub fn len(&self) -> usize {
        self.known.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Short-lived memo of the cheap app id lookup
#[derive(Debug)]
pub struct AppIdCache {
    ttl: Duration,
    value: Option<(Option<String>, Instant)>,
}

impl AppIdCache {
    pub fn new(ttl: Duration) -> Self {
        AppIdCache { ttl, value: None }
    }

    pub fn get(&mut self, now: Instant, lookup: impl FnOnce() -> Option<String>) -> Option<String> {
        if let Some((app, at)) = &self.value {
            if now.saturating_duration_since(*at) < self.ttl {
                return app.clone();
            }
        }
        let app = lookup();
        self.value = Some((app.clone(), now));
        app
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }
}
