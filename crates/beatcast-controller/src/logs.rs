//! Operational log history with live fan-out.
//!
//! [`LogHub`] keeps the most recent entries in a fixed-capacity ring and
//! forwards every new entry to live subscribers. Subscribing snapshots the
//! ring and attaches a receiver under the same lock, so an observer sees each
//! entry exactly once. [`LogHubLayer`] feeds the hub from `tracing`.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use beatcast_models::{LogEntry, LogLevel};

/// Default number of entries replayed to late observers.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

struct HubState {
    history: VecDeque<LogEntry>,
    capacity: usize,
}

/// Bounded log history plus a live broadcast channel.
#[derive(Clone)]
pub struct LogHub {
    state: Arc<Mutex<HubState>>,
    live: broadcast::Sender<LogEntry>,
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(capacity);
        Self {
            state: Arc::new(Mutex::new(HubState {
                history: VecDeque::with_capacity(capacity),
                capacity,
            })),
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry, evicting the oldest beyond capacity, and fan it out.
    pub fn publish(&self, entry: LogEntry) {
        let mut state = self.lock();
        if state.history.len() == state.capacity {
            state.history.pop_front();
        }
        state.history.push_back(entry.clone());
        // No receivers is fine
        let _ = self.live.send(entry);
    }

    /// Snapshot the history and attach to the live feed atomically.
    pub fn subscribe(&self) -> LogSubscription {
        let state = self.lock();
        LogSubscription {
            history: state.history.iter().cloned().collect(),
            live: self.live.subscribe(),
        }
    }

    /// Current history, oldest first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn observers(&self) -> usize {
        self.live.receiver_count()
    }

    /// A `tracing` layer mirroring info-and-above events into this hub.
    pub fn layer(&self) -> LogHubLayer {
        LogHubLayer { hub: self.clone() }
    }
}

/// History snapshot plus the live entries that follow it.
pub struct LogSubscription {
    pub history: Vec<LogEntry>,
    live: broadcast::Receiver<LogEntry>,
}

impl LogSubscription {
    /// Take the replayed history. Subsequent calls return an empty list.
    pub fn take_history(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.history)
    }

    /// Next live entry. Entries a lagging observer missed are skipped.
    /// Returns `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<LogEntry> {
        loop {
            match self.live.recv().await {
                Ok(entry) => return Some(entry),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Log observer lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Mirrors `tracing` events into a [`LogHub`].
#[derive(Clone)]
pub struct LogHubLayer {
    hub: LogHub,
}

impl LogHubLayer {
    pub fn new(hub: LogHub) -> Self {
        Self { hub }
    }
}

impl<S: Subscriber> Layer<S> for LogHubLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }

        let mut visitor = TextVisitor::default();
        event.record(&mut visitor);
        self.hub.publish(LogEntry::new(log_level(level), visitor.finish()));
    }
}

fn log_level(level: Level) -> LogLevel {
    match level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

/// Renders the message followed by `key=value` fields.
#[derive(Default)]
struct TextVisitor {
    message: String,
    fields: String,
}

impl TextVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for TextVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn texts(entries: &[LogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.text.clone()).collect()
    }

    #[test]
    fn test_history_is_bounded_to_most_recent() {
        let hub = LogHub::new(3);
        for i in 0..5 {
            hub.publish(LogEntry::info(format!("line {}", i)));
        }
        assert_eq!(texts(&hub.history()), vec!["line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_history_then_live_without_gap() {
        let hub = LogHub::new(10);
        hub.publish(LogEntry::info("before"));

        let mut sub = hub.subscribe();
        hub.publish(LogEntry::warn("after"));

        assert_eq!(texts(&sub.take_history()), vec!["before"]);
        assert!(sub.take_history().is_empty());
        let live = sub.next().await.unwrap();
        assert_eq!(live.text, "after");
        assert_eq!(live.level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_lagging_observer_skips_and_continues() {
        let hub = LogHub::new(2);
        let mut sub = hub.subscribe();
        for i in 0..5 {
            hub.publish(LogEntry::info(format!("line {}", i)));
        }
        let entry = sub.next().await.unwrap();
        assert_eq!(entry.text, "line 3");
        assert_eq!(sub.next().await.unwrap().text, "line 4");
    }

    #[tokio::test]
    async fn test_closed_hub_ends_subscription() {
        let hub = LogHub::new(4);
        let mut sub = hub.subscribe();
        drop(hub);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_layer_mirrors_info_and_above() {
        let hub = LogHub::new(10);
        let subscriber = tracing_subscriber::registry().with(hub.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("hidden");
            tracing::info!(job_id = "j1", "Worker ready");
            tracing::error!("Transcode failed");
        });

        let history = hub.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "Worker ready job_id=j1");
        assert_eq!(history[0].level, LogLevel::Info);
        assert_eq!(history[1].level, LogLevel::Error);
    }
}
