//! Lifecycle events: publish/subscribe with bounded replay.
//!
//! [`EventHistory`] keeps the most recent events in a fixed-size ring so a
//! reconnecting client can resume from its `Last-Event-ID`. [`EventBus`]
//! appends to that ring and then hands each event to every live subscriber.
//!
//! The bus is an explicitly constructed, single-process instance. Events
//! never leave the process that published them.

use crate::a2a::error::{A2aError, Result};
use crate::a2a::types::{Task, TaskPriority, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Hard ceiling on the replay window.
pub const MAX_HISTORY_CAPACITY: usize = 10_000;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

// ─── Event ───────────────────────────────────────────────────

/// Closed set of event kinds: six task lifecycle kinds and two presence kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.status_changed")]
    TaskStatusChanged,
    #[serde(rename = "task.message_added")]
    TaskMessageAdded,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "task.canceled")]
    TaskCanceled,
    #[serde(rename = "agent.connected")]
    AgentConnected,
    #[serde(rename = "agent.disconnected")]
    AgentDisconnected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "task.created",
            EventType::TaskStatusChanged => "task.status_changed",
            EventType::TaskMessageAdded => "task.message_added",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskFailed => "task.failed",
            EventType::TaskCanceled => "task.canceled",
            EventType::AgentConnected => "agent.connected",
            EventType::AgentDisconnected => "agent.disconnected",
        }
    }

    /// Event kind announcing a transition into `state`.
    pub fn for_state(state: TaskState) -> Self {
        match state {
            TaskState::Completed => EventType::TaskCompleted,
            TaskState::Failed | TaskState::Rejected | TaskState::Timeout => EventType::TaskFailed,
            TaskState::Canceled => EventType::TaskCanceled,
            TaskState::Submitted | TaskState::Working | TaskState::InputRequired => {
                EventType::TaskStatusChanged
            }
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    Task {
        task_id: String,
        state: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_state: Option<TaskState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        priority: Option<TaskPriority>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Agent {
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
}

impl EventPayload {
    /// Snapshot of a task after a change.
    pub fn task(task: &Task, previous_state: Option<TaskState>, reason: Option<String>) -> Self {
        EventPayload::Task {
            task_id: task.id.clone(),
            state: task.state,
            previous_state,
            session_id: task.session_id.clone(),
            priority: task.priority,
            reason,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            EventPayload::Task { task_id, .. } => Some(task_id),
            EventPayload::Agent { .. } => None,
        }
    }
}

/// Immutable notification of a lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    /// Position in this bus's publish order.
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        sequence: u64,
        event_type: EventType,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: id.into(),
            sequence,
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ─── Circular History ────────────────────────────────────────

/// Fixed-capacity ring of recent events with an id → slot index.
///
/// `add` and id lookup are O(1); nothing is ever shifted.
#[derive(Debug)]
pub struct EventHistory {
    slots: Vec<Option<Event>>,
    /// Slot of the oldest retained event.
    head: usize,
    len: usize,
    index: HashMap<String, usize>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_HISTORY_CAPACITY {
            return Err(A2aError::Configuration(format!(
                "event history capacity must be between 1 and {}, got {}",
                MAX_HISTORY_CAPACITY, capacity
            )));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            index: HashMap::with_capacity(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Append `event`, evicting the oldest one when full.
    pub fn add(&mut self, event: Event) {
        let capacity = self.capacity();
        if self.len == capacity {
            if let Some(evicted) = self.slots[self.head].take() {
                if self.index.get(&evicted.id) == Some(&self.head) {
                    self.index.remove(&evicted.id);
                }
            }
            self.head = (self.head + 1) % capacity;
            self.len -= 1;
        }

        let tail = (self.head + self.len) % capacity;
        self.index.insert(event.id.clone(), tail);
        self.slots[tail] = Some(event);
        self.len += 1;
    }

    /// Events published after `last_seen_id`, oldest first.
    ///
    /// An unknown or evicted id yields an empty vector: the replay window has
    /// expired and the caller must resync from task state.
    pub fn get_after(&self, last_seen_id: &str) -> Vec<Event> {
        let Some(&slot) = self.index.get(last_seen_id) else {
            return Vec::new();
        };
        let capacity = self.capacity();
        let offset = (slot + capacity - self.head) % capacity;
        (offset + 1..self.len)
            .filter_map(|i| self.slots[(self.head + i) % capacity].clone())
            .collect()
    }

    /// Full retained window, oldest first.
    pub fn get_all(&self) -> Vec<Event> {
        let capacity = self.capacity();
        (0..self.len)
            .filter_map(|i| self.slots[(self.head + i) % capacity].clone())
            .collect()
    }

    /// Logical reset; stale slots are overwritten by later adds.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.index = HashMap::new();
    }
}

// ─── Event Bus ───────────────────────────────────────────────

pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback. Invoked synchronously, once per event, in publish order.
///
/// Callbacks must not publish on the bus that is delivering to them.
pub type Subscriber = Arc<dyn Fn(&Event) -> std::result::Result<(), SubscriberError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct BusInner {
    history: Mutex<EventHistory>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    /// Serializes emits so every subscriber sees publish order.
    delivery: Mutex<()>,
    next_sequence: AtomicU64,
    next_subscriber: AtomicU64,
    /// Distinguishes ids from different bus instances.
    epoch: String,
}

/// Publish/subscribe hub with a bounded replay window.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("retained", &self.inner.history.lock().len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(BusInner {
                history: Mutex::new(EventHistory::new(history_capacity)?),
                subscribers: RwLock::new(Vec::new()),
                delivery: Mutex::new(()),
                next_sequence: AtomicU64::new(1),
                next_subscriber: AtomicU64::new(1),
                epoch: format!("{:x}", Utc::now().timestamp_millis()),
            }),
        })
    }

    /// Build an event with the next id and sequence, then emit it.
    pub fn publish(&self, event_type: EventType, payload: EventPayload) -> Event {
        let _delivery = self.inner.delivery.lock();
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{:08}", self.inner.epoch, sequence);
        let event = Event::new(id, sequence, event_type, payload);
        self.deliver(&event);
        event
    }

    /// Record `event` in history, then deliver it to every current subscriber.
    pub fn emit(&self, event: Event) {
        let _delivery = self.inner.delivery.lock();
        self.deliver(&event);
    }

    fn deliver(&self, event: &Event) {
        self.inner.history.lock().add(event.clone());

        let snapshot: Vec<(SubscriptionId, Subscriber)> = self.inner.subscribers.read().clone();
        for (id, subscriber) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        subscriber = id.0,
                        event_id = %event.id,
                        "Event subscriber failed: {}",
                        e
                    );
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!(
                        subscriber = id.0,
                        event_id = %event.id,
                        "Event subscriber panicked: {}",
                        reason
                    );
                }
            }
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Event) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst));
        self.inner.subscribers.write().push((id, Arc::new(callback)));
        tracing::debug!(subscriber = id.0, "Event subscriber added");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        remove_subscriber(&self.inner, id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Replay after `last_event_id`, or the whole retained window when `None`.
    pub fn get_events_after(&self, last_event_id: Option<&str>) -> Vec<Event> {
        let history = self.inner.history.lock();
        match last_event_id {
            Some(id) => history.get_after(id),
            None => history.get_all(),
        }
    }

    /// Replay after `last_event_id`, noting whether that id has already left
    /// the window. Both answers come from one look at the history.
    pub fn replay(&self, last_event_id: Option<&str>) -> Replay {
        let history = self.inner.history.lock();
        match last_event_id {
            Some(id) => Replay {
                expired: !history.contains(id),
                events: history.get_after(id),
            },
            None => Replay {
                expired: false,
                events: history.get_all(),
            },
        }
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn agent_connected(
        &self,
        agent_id: &str,
        name: Option<String>,
        endpoint: Option<String>,
    ) -> Event {
        tracing::info!("A2A: agent {} connected", agent_id);
        self.publish(
            EventType::AgentConnected,
            EventPayload::Agent {
                agent_id: agent_id.to_string(),
                name,
                endpoint,
            },
        )
    }

    pub fn agent_disconnected(&self, agent_id: &str) -> Event {
        tracing::info!("A2A: agent {} disconnected", agent_id);
        self.publish(
            EventType::AgentDisconnected,
            EventPayload::Agent {
                agent_id: agent_id.to_string(),
                name: None,
                endpoint: None,
            },
        )
    }
}

/// Result of [`EventBus::replay`].
#[derive(Debug, Clone)]
pub struct Replay {
    /// The requested id is no longer retained; `events` is empty.
    pub expired: bool,
    pub events: Vec<Event>,
}

fn remove_subscriber(inner: &BusInner, id: SubscriptionId) -> bool {
    let mut subscribers = inner.subscribers.write();
    let before = subscribers.len();
    subscribers.retain(|(sid, _)| *sid != id);
    let removed = subscribers.len() != before;
    if removed {
        tracing::debug!(subscriber = id.0, "Event subscriber removed");
    }
    removed
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`] on disconnect.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Idempotent. Returns true only on the call that removed the subscriber.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => remove_subscriber(&inner, self.id),
            None => false,
        }
    }
}
