//! Task ledger: storage contract plus the lifecycle state machine.
//!
//! Every state-changing operation publishes its event on the [`EventBus`]
//! before returning, so a caller that sees success and then subscribes will
//! find the event in the replay window.

use crate::a2a::error::{A2aError, FieldError, Result};
use crate::a2a::events::{EventBus, EventPayload, EventType};
use crate::a2a::lifecycle::validate_transition;
use crate::a2a::types::*;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

// ─── Storage Contract ────────────────────────────────────────

/// Where task records live. The ledger owns all state-machine rules;
/// a store only persists whole records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails if the id is already taken.
    async fn insert(&self, task: Task) -> Result<()>;

    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    /// Replace an existing task. Fails with `NotFound` if absent.
    async fn update(&self, task: Task) -> Result<()>;

    /// Filtered, ordered, paginated listing.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>>;

    async fn contains(&self, task_id: &str) -> Result<bool> {
        Ok(self.get(task_id).await?.is_some())
    }
}

/// In-memory task store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first by default; ties broken by id ascending.
fn compare_tasks(a: &Task, b: &Task, order: SortOrder) -> Ordering {
    let by_time = match order {
        SortOrder::Desc => b.created_at.cmp(&a.created_at),
        SortOrder::Asc => a.created_at.cmp(&b.created_at),
    };
    by_time.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(A2aError::validation(
                "Task id already exists",
                vec![FieldError::new("taskId", format!("'{}' is already in use", task.id))],
            ));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn update(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                Ok(())
            }
            None => Err(A2aError::NotFound(task.id)),
        }
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<&Task> = tasks.values().filter(|t| filter.matches(t)).collect();
        matching.sort_by(|a, b| compare_tasks(a, b, filter.order));
        Ok(matching
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.effective_limit())
            .map(TaskSummary::from)
            .collect())
    }

    async fn contains(&self, task_id: &str) -> Result<bool> {
        Ok(self.tasks.read().await.contains_key(task_id))
    }
}

// ─── Per-task Locking ────────────────────────────────────────

/// Exclusive hold on one task id for the length of an operation.
///
/// The map entry lives only while someone holds or awaits the lock, so ids
/// that never become tasks leave nothing behind.
struct TaskLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    task_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TaskLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Idle once the map holds the only reference; waiters hold clones.
        self.locks.remove_if(&self.task_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// ─── Ledger ──────────────────────────────────────────────────

/// Owns task records and enforces the lifecycle state machine.
///
/// Operations on the same task id are serialized and applied in call order;
/// operations on different ids do not contend.
#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn TaskStore>,
    bus: EventBus,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn TaskStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Ledger over an [`InMemoryTaskStore`].
    pub fn in_memory(bus: EventBus) -> Self {
        Self::new(Arc::new(InMemoryTaskStore::new()), bus)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    async fn lock_task(&self, task_id: &str) -> TaskLock<'_> {
        let lock = self.locks.entry(task_id.to_string()).or_default().clone();
        TaskLock {
            locks: &self.locks,
            task_id: task_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Create a task in `SUBMITTED` and announce it with `task.created`.
    pub async fn submit(&self, new_task: NewTask) -> Result<Task> {
        let id = match new_task.id {
            Some(id) if id.trim().is_empty() => {
                return Err(A2aError::validation(
                    "Task id must not be blank",
                    vec![FieldError::new("taskId", "must not be blank")],
                ));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let _guard = self.lock_task(&id).await;
        let now = Utc::now();
        let mut task = Task {
            id: id.clone(),
            state: TaskState::Submitted,
            name: new_task.name,
            description: new_task.description,
            priority: new_task.priority,
            session_id: new_task.session_id,
            created_at: now,
            updated_at: now,
            metadata: new_task.metadata,
            messages: Vec::new(),
            artifacts: Vec::new(),
            history: Vec::new(),
        };
        if let Some(input) = new_task.initial_message {
            task.messages.push(build_message(&id, input)?);
        }

        self.store.insert(task.clone()).await?;
        self.bus
            .publish(EventType::TaskCreated, EventPayload::task(&task, None, None));

        tracing::info!("A2A: Created task {} ({} message(s))", id, task.messages.len());
        Ok(task)
    }

    /// Append a message without touching the task's state.
    pub async fn append_message(&self, task_id: &str, input: MessageInput) -> Result<Message> {
        let _guard = self.lock_task(task_id).await;
        let mut task = self.load(task_id).await?;

        let message = build_message(task_id, input)?;
        task.messages.push(message.clone());
        task.updated_at = message.created_at;
        self.store.update(task.clone()).await?;

        self.bus.publish(
            EventType::TaskMessageAdded,
            EventPayload::task(&task, None, None),
        );
        tracing::debug!("A2A: Appended message {} to task {}", message.id, task_id);
        Ok(message)
    }

    pub async fn get(&self, task_id: &str) -> Result<Task> {
        self.load(task_id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>> {
        self.store.list(filter).await
    }

    /// The only mutator of `state`. Rejected transitions leave the task unchanged.
    pub async fn transition(
        &self,
        task_id: &str,
        next: TaskState,
        reason: Option<String>,
    ) -> Result<Task> {
        let _guard = self.lock_task(task_id).await;
        let mut task = self.load(task_id).await?;
        let previous = task.state;

        if let Err(e) = validate_transition(previous, next) {
            tracing::warn!(
                "A2A: Rejected transition {} -> {} for task {}",
                previous,
                next,
                task_id
            );
            return Err(e);
        }

        let now = Utc::now();
        task.state = next;
        task.updated_at = now;
        task.history.push(StateChange {
            from: previous,
            to: next,
            at: now,
            reason: reason.clone(),
        });
        self.store.update(task.clone()).await?;

        self.bus.publish(
            EventType::for_state(next),
            EventPayload::task(&task, Some(previous), reason),
        );
        tracing::info!("A2A: Task {} {} -> {}", task_id, previous, next);
        Ok(task)
    }

    /// Move a task to `CANCELED`.
    ///
    /// External delegators learn of the cancellation from the `task.canceled`
    /// event; the ledger does not call them.
    pub async fn cancel(&self, task_id: &str, reason: Option<String>) -> Result<Task> {
        self.transition(task_id, TaskState::Canceled, reason).await
    }

    /// Attach an artifact to a task that is still live.
    pub async fn add_artifact(
        &self,
        task_id: &str,
        name: Option<String>,
        description: Option<String>,
        parts: Vec<Part>,
    ) -> Result<Task> {
        if parts.is_empty() {
            return Err(A2aError::validation(
                "Artifact must contain at least one part",
                vec![FieldError::new("parts", "must not be empty")],
            ));
        }

        let _guard = self.lock_task(task_id).await;
        let mut task = self.load(task_id).await?;
        if task.state.is_terminal() {
            return Err(A2aError::TaskTerminal {
                id: task.id,
                state: task.state,
            });
        }

        let now = Utc::now();
        task.artifacts.push(Artifact {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            parts,
            created_at: now,
        });
        task.updated_at = now;
        self.store.update(task.clone()).await?;

        self.bus.publish(
            EventType::TaskStatusChanged,
            EventPayload::task(&task, Some(task.state), None),
        );
        Ok(task)
    }

    async fn load(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| A2aError::NotFound(task_id.to_string()))
    }
}

fn build_message(task_id: &str, input: MessageInput) -> Result<Message> {
    if input.parts.is_empty() {
        return Err(A2aError::validation(
            "Message must contain at least one part",
            vec![FieldError::new("parts", "must not be empty")],
        ));
    }
    Ok(Message {
        id: Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        role: input.role,
        parts: input.parts,
        created_at: Utc::now(),
        metadata: input.metadata,
    })
}
