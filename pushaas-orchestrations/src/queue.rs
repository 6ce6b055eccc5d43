//! Job queue, handler registry and worker pool
//!
//! Jobs carry a kind name and a JSON payload. A [`WorkerPool`] claims jobs
//! from a [`JobQueue`] and dispatches each one to the [`JobHandler`]
//! registered for its kind. Unknown kinds and handler errors reject the job;
//! nothing is retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{QueueError, WorkerError};
use crate::names::jobs;

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Provision,
    Deprovision,
    UpdateInstance,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Provision, JobKind::Deprovision, JobKind::UpdateInstance];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Provision => jobs::PROVISION,
            JobKind::Deprovision => jobs::DEPROVISION,
            JobKind::UpdateInstance => jobs::UPDATE_INSTANCE,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| QueueError::UnknownKind(s.to_string()))
    }
}

/// A claimed unit of work.
///
/// The kind stays a plain string so rows written by other producers can be
/// claimed and rejected instead of breaking the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.name().to_string(),
            payload,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Uuid, QueueError>;

    /// Claim the oldest pending job, `None` if the queue is empty
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    async fn ack(&self, job_id: Uuid) -> Result<(), QueueError>;

    async fn reject(&self, job_id: Uuid, reason: &str) -> Result<(), QueueError>;

    /// Park an idle consumer until work may be available
    async fn wait_for_jobs(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

/// Serialize `payload` and enqueue it
pub async fn enqueue_json<T: Serialize + Sync>(
    queue: &dyn JobQueue,
    kind: JobKind,
    payload: &T,
) -> Result<Uuid, QueueError> {
    let value = serde_json::to_value(payload).map_err(QueueError::Encode)?;
    queue.enqueue(kind, value).await
}

// ============================================================================
// In-memory queue
// ============================================================================

/// Finished jobs remembered for inspection
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    in_flight: HashMap<Uuid, Job>,
    acked: VecDeque<Uuid>,
    rejected: VecDeque<(Job, String)>,
}

#[derive(Debug)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    history_limit: usize,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the `limit` most recent acked and rejected jobs
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            history_limit: limit,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enqueue a job whose kind name is not checked
    pub fn push_raw(&self, kind: &str, payload: serde_json::Value) -> Uuid {
        let job = Job {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            payload,
        };
        let id = job.id;
        self.state().pending.push_back(job);
        self.notify.notify_one();
        id
    }

    pub fn pending(&self) -> Vec<Job> {
        self.state().pending.iter().cloned().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    pub fn acked(&self) -> Vec<Uuid> {
        self.state().acked.iter().copied().collect()
    }

    pub fn rejected(&self) -> Vec<(Job, String)> {
        self.state().rejected.iter().cloned().collect()
    }

    /// Nothing pending and nothing claimed
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.pending.is_empty() && state.in_flight.is_empty()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let job = Job::new(kind, payload);
        let id = job.id;
        self.state().pending.push_back(job);
        self.notify.notify_one();
        tracing::debug!(job_id = %id, kind = %kind, "job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut state = self.state();
        let Some(job) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state();
        state
            .in_flight
            .remove(&job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;
        state.acked.push_back(job_id);
        while state.acked.len() > self.history_limit {
            state.acked.pop_front();
        }
        Ok(())
    }

    async fn reject(&self, job_id: Uuid, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        let job = state
            .in_flight
            .remove(&job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;
        state.rejected.push_back((job, reason.to_string()));
        while state.rejected.len() > self.history_limit {
            state.rejected.pop_front();
        }
        Ok(())
    }

    async fn wait_for_jobs(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), WorkerError>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    /// Later registrations for the same kind replace earlier ones
    pub fn register(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

// ============================================================================
// Worker pool
// ============================================================================

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    registry: HandlerRegistry,
    idle_poll: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, registry: HandlerRegistry) -> Self {
        Self {
            queue,
            registry,
            idle_poll: Duration::from_secs(1),
        }
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Claim and handle one job. Returns `false` if the queue was empty.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        match self.dispatch(&job).await {
            Ok(()) => {
                tracing::debug!(job_id = %job.id, kind = %job.kind, "job completed");
                self.queue.ack(job.id).await?;
            }
            Err(reason) => {
                tracing::warn!(job_id = %job.id, kind = %job.kind, reason = %reason, "job rejected");
                self.queue.reject(job.id, &reason).await?;
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, job: &Job) -> Result<(), String> {
        let kind = JobKind::from_str(&job.kind).map_err(|e| e.to_string())?;
        let handler = self
            .registry
            .get(kind)
            .ok_or_else(|| format!("no handler registered for {}", kind))?;
        handler
            .handle(job.payload.clone())
            .await
            .map_err(|e| e.to_string())
    }

    /// Handle jobs until the queue is empty, including jobs enqueued by handlers
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut handled = 0;
        while self.process_next().await? {
            handled += 1;
        }
        Ok(handled)
    }

    /// Spawn `workers` consumers
    pub fn start(self: Arc<Self>, workers: usize) -> WorkerPoolHandle {
        let (shutdown, signal) = watch::channel(false);
        let tasks = (0..workers.max(1))
            .map(|worker_id| {
                let pool = self.clone();
                let signal = signal.clone();
                tokio::spawn(async move { pool.consume(worker_id, signal).await })
            })
            .collect();

        tracing::info!(workers = workers.max(1), kinds = ?self.registry.kinds(), "Worker pool started");
        WorkerPoolHandle { shutdown, tasks }
    }

    async fn consume(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(worker_id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => self.queue.wait_for_jobs(self.idle_poll),
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "failed to claim job");
                    self.queue.wait_for_jobs(self.idle_poll)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = idle => {}
            }
        }
        tracing::debug!(worker_id, "worker stopped");
    }
}

pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Stop claiming new jobs and wait for in-progress ones to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}
