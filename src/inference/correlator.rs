//! Task Correlation
//!
//! Single responsibility: Pair each in-flight task identifier with the caller
//! awaiting it. Knows nothing about message contents beyond the identifier.
//!
//! Each pending task owns a oneshot sender. Resolving removes the entry and
//! consumes the sender, so a task can complete at most once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::{GeneratedImage, ImageInferenceTask};
use crate::error::AdforgeError;

/// What a caller eventually receives for one task.
pub type TaskOutcome = Result<GeneratedImage, AdforgeError>;

struct PendingTask {
    /// Connection the task was sent on
    connection: u64,
    responder: oneshot::Sender<TaskOutcome>,
    /// Original request, kept for diagnostics only
    request: ImageInferenceTask,
    registered_at: Instant,
}

/// A diagnostic view of one pending task.
#[derive(Debug, Clone)]
pub struct PendingTaskInfo {
    pub task_uuid: Uuid,
    pub connection: u64,
    pub prompt: String,
    pub age: Duration,
}

/// Map from task identifier to awaiting caller.
#[derive(Default)]
pub struct TaskCorrelator {
    pending: DashMap<Uuid, PendingTask>,
}

impl TaskCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task sent (or about to be sent) on `connection`.
    ///
    /// Fails if the identifier is already pending.
    pub fn register(
        &self,
        task_uuid: Uuid,
        connection: u64,
        request: ImageInferenceTask,
    ) -> Result<oneshot::Receiver<TaskOutcome>, AdforgeError> {
        match self.pending.entry(task_uuid) {
            Entry::Occupied(_) => Err(AdforgeError::Protocol(format!(
                "Task identifier {} is already pending",
                task_uuid
            ))),
            Entry::Vacant(slot) => {
                let (responder, receiver) = oneshot::channel();
                slot.insert(PendingTask {
                    connection,
                    responder,
                    request,
                    registered_at: Instant::now(),
                });
                debug!(task_uuid = %task_uuid, connection, "Task registered");
                Ok(receiver)
            }
        }
    }

    /// Resolve a task only if it was sent on `connection`.
    ///
    /// A result arriving on a different connection than the one the task
    /// was sent on is stale and is ignored.
    pub fn resolve_on(&self, connection: u64, task_uuid: Uuid, outcome: TaskOutcome) -> bool {
        match self
            .pending
            .remove_if(&task_uuid, |_, task| task.connection == connection)
        {
            Some((_, task)) => {
                deliver(task_uuid, task, outcome);
                true
            }
            None if self.pending.contains_key(&task_uuid) => {
                warn!(
                    task_uuid = %task_uuid,
                    connection,
                    "Result arrived on a different connection than the task, ignoring"
                );
                false
            }
            None => {
                warn!(task_uuid = %task_uuid, "No pending task for result, ignoring");
                false
            }
        }
    }

    /// Drop a task without resolving it (caller lost interest).
    pub fn deregister(&self, task_uuid: Uuid) -> bool {
        let removed = self.pending.remove(&task_uuid).is_some();
        if removed {
            debug!(task_uuid = %task_uuid, "Task deregistered");
        }
        removed
    }

    /// Fail every task sent on `connection`. Returns how many were failed.
    pub fn fail_connection(&self, connection: u64, reason: &str) -> usize {
        let ids: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.connection == connection)
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for task_uuid in ids {
            if let Some((_, task)) = self
                .pending
                .remove_if(&task_uuid, |_, task| task.connection == connection)
            {
                deliver(task_uuid, task, Err(AdforgeError::Transport(reason.to_string())));
                failed += 1;
            }
        }
        failed
    }

    /// Fail every outstanding task. Used on teardown.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();

        let mut failed = 0;
        for task_uuid in ids {
            if let Some((_, task)) = self.pending.remove(&task_uuid) {
                deliver(task_uuid, task, Err(AdforgeError::Closed(reason.to_string())));
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, task_uuid: Uuid) -> bool {
        self.pending.contains_key(&task_uuid)
    }

    /// Snapshot of pending tasks, oldest first.
    pub fn snapshot(&self) -> Vec<PendingTaskInfo> {
        let mut tasks: Vec<PendingTaskInfo> = self
            .pending
            .iter()
            .map(|entry| PendingTaskInfo {
                task_uuid: *entry.key(),
                connection: entry.connection,
                prompt: entry.request.positive_prompt.clone(),
                age: entry.registered_at.elapsed(),
            })
            .collect();
        tasks.sort_by(|a, b| b.age.cmp(&a.age));
        tasks
    }
}

fn deliver(task_uuid: Uuid, task: PendingTask, outcome: TaskOutcome) {
    debug!(
        task_uuid = %task_uuid,
        ok = outcome.is_ok(),
        elapsed_ms = task.registered_at.elapsed().as_millis() as u64,
        "Task resolved"
    );
    if task.responder.send(outcome).is_err() {
        debug!(task_uuid = %task_uuid, "Caller no longer waiting");
    }
}

/// Deregisters a task when dropped unless it has already been resolved.
///
/// Held by `submit` so an abandoned call does not leave its entry behind.
pub struct PendingGuard<'a> {
    correlator: &'a TaskCorrelator,
    task_uuid: Uuid,
}

impl<'a> PendingGuard<'a> {
    pub fn new(correlator: &'a TaskCorrelator, task_uuid: Uuid) -> Self {
        Self {
            correlator,
            task_uuid,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.deregister(self.task_uuid);
    }
}
