//! Synchronous publish/subscribe for table lifecycle events.
//!
//! Topics follow `table:<resource>:<action>:<status>` where `<resource>` is
//! the table name with underscores replaced by hyphens, e.g.
//! `table:pdf-info:delete:completed`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::utils::now_ms;

/// The write that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for TableAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableAction::Create => write!(f, "create"),
            TableAction::Update => write!(f, "update"),
            TableAction::Delete => write!(f, "delete"),
        }
    }
}

/// Outcome of the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Completed,
    Failed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Completed => write!(f, "completed"),
            EventStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Builds the topic string for a table event.
///
/// # Examples
///
/// ```
/// use pdfstore::events::{EventStatus, TableAction, topic};
///
/// assert_eq!(
///     topic("pdf_info", TableAction::Delete, EventStatus::Completed),
///     "table:pdf-info:delete:completed"
/// );
/// ```
pub fn topic(table_name: &str, action: TableAction, status: EventStatus) -> String {
    format!("table:{}:{}:{}", table_name.replace('_', "-"), action, status)
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEvent {
    pub table: String,
    pub action: TableAction,
    pub status: EventStatus,
    /// Primary key of the affected record.
    pub record_id: String,
    /// Normalized record (create/update) or `None`.
    pub data: Option<Value>,
    pub timestamp: i64,
}

impl TableEvent {
    /// A completion event for `record_id` in `table`.
    pub fn completed(
        table: &str,
        action: TableAction,
        record_id: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            table: table.to_string(),
            action,
            status: EventStatus::Completed,
            record_id: record_id.into(),
            data,
            timestamp: now_ms(),
        }
    }

    /// The topic this event is published on.
    pub fn topic(&self) -> String {
        topic(&self.table, self.action, self.status)
    }
}

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&TableEvent) -> Result<()> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    subscriber: String,
    handler: Handler,
}

/// Topic-keyed, synchronous event bus.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic` on behalf of `subscriber`.
    pub fn on<F>(&self, topic: &str, subscriber: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&TableEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                id,
                subscriber: subscriber.to_string(),
                handler: Arc::new(handler),
            });
        debug!(topic, subscriber, "subscribed");
        id
    }

    /// Removes every handler `subscriber` registered for `topic`.
    ///
    /// Returns the number of handlers removed.
    pub fn off(&self, topic: &str, subscriber: &str) -> usize {
        self.remove_where(topic, |s| s.subscriber == subscriber)
    }

    /// Removes a single handler.
    pub fn off_subscription(&self, topic: &str, id: SubscriptionId) -> bool {
        self.remove_where(topic, |s| s.id == id) > 0
    }

    /// Number of handlers registered for `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    /// Calls every handler of `event`'s topic in registration order.
    ///
    /// A failing handler is logged and skipped; it never affects the caller
    /// or the remaining handlers. Returns the number of handlers invoked.
    pub fn emit(&self, event: &TableEvent) -> usize {
        let topic = event.topic();
        // Snapshot so handlers may subscribe or emit without deadlocking
        let handlers: Vec<(String, Handler)> = match self.topics.lock().get(&topic) {
            Some(subs) => subs
                .iter()
                .map(|s| (s.subscriber.clone(), Arc::clone(&s.handler)))
                .collect(),
            None => return 0,
        };

        debug!(topic = %topic, handlers = handlers.len(), record_id = %event.record_id, "emit");
        for (subscriber, handler) in &handlers {
            if let Err(e) = handler(event) {
                warn!(topic = %topic, subscriber = %subscriber, error = %e, "event handler failed");
            }
        }
        handlers.len()
    }

    fn remove_where(&self, topic: &str, mut pred: impl FnMut(&Subscription) -> bool) -> usize {
        let mut topics = self.topics.lock();
        let Some(subs) = topics.get_mut(topic) else {
            return 0;
        };
        let before = subs.len();
        subs.retain(|s| !pred(s));
        let removed = before - subs.len();
        if subs.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}
