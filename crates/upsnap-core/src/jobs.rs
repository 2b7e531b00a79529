//! Registry of running background jobs.
//!
//! Each job is a spawned task paired with the [`CancellationToken`] that
//! stops it. Removing a job cancels it; the returned handle can be awaited to
//! know when it has actually finished.

use std::fmt;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Identifier of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A running job.
#[derive(Debug)]
pub struct Job {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Job {
    /// Wrap a spawned task and the token that stops it.
    pub fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { token, handle }
    }

    /// Signal the job to stop and hand back its task handle.
    pub fn cancel(self) -> JoinHandle<()> {
        self.token.cancel();
        self.handle
    }
}

/// Concurrency-safe map from [`JobId`] to running [`Job`].
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under `id`. A job already under that id is cancelled.
    pub fn add(&self, id: JobId, job: Job) {
        debug!("Registering job {}", id);
        if let Some(previous) = self.jobs.insert(id, job) {
            previous.cancel();
        }
    }

    /// Cancel and remove a job. No-op if `id` is not registered.
    pub fn remove(&self, id: &JobId) -> Option<JoinHandle<()>> {
        self.jobs.remove(id).map(|(id, job)| {
            debug!("Cancelling job {}", id);
            job.cancel()
        })
    }

    /// Cancel and remove every job.
    pub fn remove_all(&self) -> Vec<JoinHandle<()>> {
        self.entries()
            .iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    /// Identifiers of the registered jobs.
    pub fn entries(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is registered.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
