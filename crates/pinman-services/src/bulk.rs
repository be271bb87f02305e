//! Bulk job registry.
//!
//! Pinning or unpinning a large file set is submitted as a job: the
//! registry spawns a task driving the coordinator file by file and keeps
//! an inspectable record of progress and per-file outcomes. Jobs are
//! identified by UUID and survive in the registry until explicitly
//! cleared.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use uuid::Uuid;

use pinman_core::models::{FileId, Owner};
use pinman_core::PinError;

use crate::coordinator::PinCoordinator;
use crate::pinner::PinRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Pin,
    Unpin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    Cancelled,
}

/// Result of one file within a bulk job.
#[derive(Debug, Clone)]
pub struct BulkOutcome {
    pub file_id: FileId,
    /// `None` on success.
    pub error: Option<String>,
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
}

struct JobEntry {
    kind: JobKind,
    state: JobState,
    submitted_at: DateTime<Utc>,
    total: usize,
    outcomes: Vec<BulkOutcome>,
    abort: AbortHandle,
}

impl JobEntry {
    fn status(&self, id: Uuid) -> JobStatus {
        JobStatus {
            id,
            kind: self.kind,
            state: self.state,
            submitted_at: self.submitted_at,
            total: self.total,
            done: self.outcomes.len(),
            failed: self.outcomes.iter().filter(|o| o.error.is_some()).count(),
        }
    }
}

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submit a bulk pin job. Each file gets its own pin request derived
    /// from `template`; files are processed sequentially in submission
    /// order.
    pub fn submit_bulk_pin(
        &self,
        coordinator: Arc<PinCoordinator>,
        files: Vec<FileId>,
        template: PinRequest,
    ) -> Uuid {
        self.submit(JobKind::Pin, files, move |file_id| {
            let coordinator = coordinator.clone();
            let mut request = template.clone();
            async move {
                request.attributes.file_id = file_id;
                coordinator.pin(request).await.map(|_| ())
            }
        })
    }

    /// Submit a bulk unpin job flagging all of `owner`'s pins on each file.
    pub fn submit_bulk_unpin(
        &self,
        coordinator: Arc<PinCoordinator>,
        files: Vec<FileId>,
        owner: Owner,
    ) -> Uuid {
        self.submit(JobKind::Unpin, files, move |file_id| {
            let coordinator = coordinator.clone();
            let owner = owner.clone();
            async move { coordinator.unpin(&owner, &file_id, None).await }
        })
    }

    fn submit<F, Fut>(&self, kind: JobKind, files: Vec<FileId>, mut operation: F) -> Uuid
    where
        F: FnMut(FileId) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), PinError>> + Send,
    {
        let id = Uuid::new_v4();
        let total = files.len();
        let jobs = self.jobs.clone();

        // The task must not record outcomes before its registry entry
        // exists, so it waits for the insertion below.
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn({
            let jobs = jobs.clone();
            async move {
                if ready_rx.await.is_err() {
                    return;
                }
                for file_id in files {
                    let outcome = BulkOutcome {
                        file_id: file_id.clone(),
                        error: operation(file_id).await.err().map(|e| e.to_string()),
                    };
                    if let Some(entry) = lock(&jobs).get_mut(&id) {
                        entry.outcomes.push(outcome);
                    }
                }
                if let Some(entry) = lock(&jobs).get_mut(&id) {
                    entry.state = JobState::Completed;
                }
                tracing::info!(job_id = %id, ?kind, total, "Bulk job completed");
            }
        });

        lock(&jobs).insert(
            id,
            JobEntry {
                kind,
                state: JobState::Running,
                submitted_at: Utc::now(),
                total,
                outcomes: Vec::new(),
                abort: handle.abort_handle(),
            },
        );
        let _ = ready_tx.send(());
        tracing::info!(job_id = %id, ?kind, total, "Bulk job submitted");
        id
    }

    /// Status snapshots of all known jobs, newest first.
    pub fn list(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = lock(&self.jobs)
            .iter()
            .map(|(id, entry)| entry.status(*id))
            .collect();
        statuses.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        statuses
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        lock(&self.jobs).get(&id).map(|entry| entry.status(id))
    }

    /// Per-file outcomes recorded so far.
    pub fn outcomes(&self, id: Uuid) -> Option<Vec<BulkOutcome>> {
        lock(&self.jobs).get(&id).map(|entry| entry.outcomes.clone())
    }

    /// Cancel a running job. Files already processed keep their outcome;
    /// the rest are never attempted. Idempotent for finished jobs.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&id) {
            Some(entry) if entry.state == JobState::Running => {
                entry.abort.abort();
                entry.state = JobState::Cancelled;
                tracing::info!(job_id = %id, "Bulk job cancelled");
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// Drop finished jobs from the registry, returning how many were
    /// removed.
    pub fn clear_completed(&self) -> usize {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, entry| entry.state == JobState::Running);
        before - jobs.len()
    }
}

fn lock(jobs: &Mutex<HashMap<Uuid, JobEntry>>) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobEntry>> {
    match jobs.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
