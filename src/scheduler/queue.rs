use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A window or activity came to the front
    StateChanged,
    /// Something inside a window changed
    ContentChanged,
}

/// A signal from the host that the tree may have changed
#[derive(Debug, Clone)]
pub struct ChangeNotification<N> {
    pub kind: EventKind,
    pub app_id: String,
    pub class_name: Option<String>,
    pub source: Option<N>,
    pub time: Instant,
}

impl<N> ChangeNotification<N> {
    pub fn new(kind: EventKind, app_id: impl Into<String>) -> Self {
        ChangeNotification {
            kind,
            app_id: app_id.into(),
            class_name: None,
            source: None,
            time: Instant::now(),
        }
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn source(mut self, source: N) -> Self {
        self.source = Some(source);
        self
    }

    fn same_key(&self, other: &Self) -> bool {
        self.kind == other.kind && self.app_id == other.app_id && self.class_name == other.class_name
    }
}

/// The notifications drained for one evaluation pass
#[derive(Debug, Clone)]
pub struct Batch<N> {
    pub events: usize,
    pub kind: EventKind,
    pub app_id: String,
    pub class_name: Option<String>,
    /// Sources of the last two notifications of the trailing run, oldest first
    pub sources: Vec<N>,
    /// The drained notifications did not all share one key
    pub mixed: bool,
    /// App and class of the last state change, a candidate new activity
    pub activity: Option<(String, String)>,
}

/// Reduce drained notifications to what one pass needs
pub fn coalesce<N>(mut events: Vec<ChangeNotification<N>>) -> Option<Batch<N>> {
    let last = events.last()?;
    let run = events.iter().rev().take_while(|e| e.same_key(last)).count();
    let mixed = run < events.len();
    let activity = events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::StateChanged)
        .and_then(|e| Some((e.app_id.clone(), e.class_name.clone()?)));
    let (kind, app_id, class_name) = (last.kind, last.app_id.clone(), last.class_name.clone());

    let total = events.len();
    let sources = events
        .split_off(total - run.min(2))
        .into_iter()
        .filter_map(|e| e.source)
        .collect();

    Some(Batch {
        events: total,
        kind,
        app_id,
        class_name,
        sources,
        mixed,
        activity,
    })
}

/// Shared notification queue between the host callback path and the worker
pub struct NotificationQueue<N> {
    events: Mutex<VecDeque<ChangeNotification<N>>>,
    notify: Notify,
}

impl<N> NotificationQueue<N> {
    pub fn new() -> Self {
        NotificationQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append without waiting on the worker
    pub fn push(&self, notification: ChangeNotification<N>) {
        self.events.lock().push_back(notification);
        self.notify.notify_one();
    }

    pub fn drain(&self) -> Option<Batch<N>> {
        let events: Vec<_> = self.events.lock().drain(..).collect();
        coalesce(events)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once something was pushed since the last wakeup
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl<N> Default for NotificationQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Content changes closer together than this are dropped while the screen is considered settled
const CONTENT_INTERVAL: Duration = Duration::from_millis(100);
/// The screen is unsettled for this long after the app in front changes
const APP_CHANGE_GRACE: Duration = Duration::from_secs(5);
/// The screen is unsettled for this long after a rule triggered
const TRIGGER_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct ThrottleMarks {
    last_content: Option<Instant>,
    /// `None` until an app was seen in front, which counts as unsettled
    app_changed_at: Option<Instant>,
    triggered_at: Option<Instant>,
}

/// Ingestion gate for bursts of content changes on a settled screen
#[derive(Debug, Default)]
pub struct ContentThrottle {
    marks: Mutex<ThrottleMarks>,
}

impl ContentThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the notification should be queued; state changes always are
    pub fn admit<N>(&self, notification: &ChangeNotification<N>) -> bool {
        if notification.kind != EventKind::ContentChanged {
            return true;
        }
        let at = notification.time;
        let mut marks = self.marks.lock();
        let within = |mark: Option<Instant>, window: Duration| {
            mark.map_or(false, |m| at.saturating_duration_since(m) < window)
        };
        let settled = marks.app_changed_at.is_some()
            && !within(marks.app_changed_at, APP_CHANGE_GRACE)
            && !within(marks.triggered_at, TRIGGER_GRACE);
        if settled && within(marks.last_content, CONTENT_INTERVAL) {
            return false;
        }
        marks.last_content = Some(at);
        true
    }

    pub fn app_changed(&self, at: Instant) {
        self.marks.lock().app_changed_at = Some(at);
    }

    pub fn triggered(&self, at: Instant) {
        self.marks.lock().triggered_at = Some(at);
    }
}
