//! Persistent background job queue.
//!
//! Long-running operations (deploy-many, collection-refresh) run on a worker
//! thread behind a bounded queue. Every job persists its state to disk as a
//! JSON record, so an interrupted process finds queued and running jobs on
//! restart and either resumes or cancels them cleanly. The queue rejects new
//! work with an explicit backpressure error when its backlog exceeds the
//! configured limit.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::storage::atomic_write;

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue.
    Queued,
    /// Executing on the worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before or during execution.
    Canceled,
}

impl JobState {
    /// Whether the job still needs the worker.
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// One persisted job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job id.
    pub id: String,
    /// What kind of work this is (e.g. `"deploy-many"`, `"refresh"`).
    pub kind: String,
    /// Operation-specific parameters.
    pub payload: serde_json::Value,
    /// Current state.
    pub state: JobState,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Short result or error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_excerpt: Option<String>,
}

impl JobRecord {
    /// A fresh queued job.
    #[must_use]
    pub fn new(kind: &str, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_owned(),
            payload,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            log_excerpt: None,
        }
    }
}

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

/// One JSON file per job under the jobs directory; writes are atomic.
#[derive(Clone, Debug)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// A store rooted at `dir`.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Persist a job record.
    pub fn save(&self, job: &JobRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(job).map_err(|e| VaultError::Integrity {
            detail: format!("serialize job: {e}"),
        })?;
        atomic_write(&self.job_path(&job.id), json.as_bytes())
    }

    /// Load a job by id.
    pub fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let path = self.job_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let job = serde_json::from_str(&content).map_err(|e| VaultError::Parse {
            path,
            detail: e.to_string(),
        })?;
        Ok(Some(job))
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        if !self.dir.exists() {
            return Ok(jobs);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let job: JobRecord = serde_json::from_str(&content).map_err(|e| VaultError::Parse {
                path: path.clone(),
                detail: e.to_string(),
            })?;
            jobs.push(job);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    /// Jobs left queued or running by an interrupted process, reset to
    /// queued so the runner can pick them up again.
    pub fn recover_incomplete(&self) -> Result<Vec<JobRecord>> {
        let mut recovered = Vec::new();
        for mut job in self.list()? {
            if job.state.is_runnable() {
                job.state = JobState::Queued;
                self.save(&job)?;
                recovered.push(job);
            }
        }
        Ok(recovered)
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

// ---------------------------------------------------------------------------
// JobRunner
// ---------------------------------------------------------------------------

/// The function a runner executes for each job: returns a log excerpt on
/// success.
pub type JobFn = dyn Fn(&JobRecord) -> Result<String> + Send + Sync;

struct RunnerShared {
    store: JobStore,
    queue: Mutex<VecDeque<String>>,
    wakeup: Condvar,
    stop: AtomicBool,
    limit: usize,
    job_fn: Box<JobFn>,
}

/// In-process worker that drains the queue and persists every state change.
pub struct JobRunner {
    shared: Arc<RunnerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    /// Build a runner over `jobs_dir` with the given backlog bound.
    #[must_use]
    pub fn new(jobs_dir: &Path, limit: usize, job_fn: Box<JobFn>) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                store: JobStore::new(jobs_dir.to_path_buf()),
                queue: Mutex::new(VecDeque::new()),
                wakeup: Condvar::new(),
                stop: AtomicBool::new(false),
                limit,
                job_fn,
            }),
            worker: Mutex::new(None),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &JobStore {
        &self.shared.store
    }

    /// Start the worker thread and requeue jobs recovered from a previous
    /// process. Calling `start` twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }
        for job in self.shared.store.recover_incomplete()? {
            lock(&self.shared.queue).push_back(job.id);
        }
        let shared = Arc::clone(&self.shared);
        *worker = Some(std::thread::spawn(move || run_loop(&shared)));
        Ok(())
    }

    /// Persist and enqueue a job.
    ///
    /// # Errors
    /// Returns [`VaultError::Backpressure`] when the backlog is at the
    /// configured limit; callers must surface this rather than drop work.
    pub fn enqueue(&self, job: JobRecord) -> Result<()> {
        {
            let queue = lock(&self.shared.queue);
            if queue.len() >= self.shared.limit {
                return Err(VaultError::Backpressure {
                    limit: self.shared.limit,
                });
            }
        }
        self.shared.store.save(&job)?;
        lock(&self.shared.queue).push_back(job.id);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Mark a queued job cancelled; a running job finishes its current
    /// artifact work first (the job function observes its own token).
    pub fn cancel(&self, id: &str) -> Result<()> {
        lock(&self.shared.queue).retain(|queued| queued != id);
        if let Some(mut job) = self.shared.store.get(id)? {
            if job.state == JobState::Queued {
                job.state = JobState::Canceled;
                job.ended_at = Some(Utc::now());
                self.shared.store.save(&job)?;
            }
        }
        Ok(())
    }

    /// Stop the worker after its current job.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: &RunnerShared) {
    loop {
        let id = {
            let mut queue = lock(&shared.queue);
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(id) = queue.pop_front() {
                    break id;
                }
                let (guard, _timeout) = shared
                    .wakeup
                    .wait_timeout(queue, std::time::Duration::from_millis(200))
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                queue = guard;
            }
        };

        let Ok(Some(mut job)) = shared.store.get(&id) else {
            continue;
        };
        if job.state != JobState::Queued {
            continue;
        }

        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        if shared.store.save(&job).is_err() {
            continue;
        }

        let outcome = (shared.job_fn)(&job);
        job.ended_at = Some(Utc::now());
        match outcome {
            Ok(excerpt) => {
                job.state = JobState::Completed;
                job.log_excerpt = Some(excerpt);
            }
            Err(VaultError::Cancelled) => {
                job.state = JobState::Canceled;
                job.log_excerpt = Some("cancelled at an artifact boundary".to_owned());
            }
            Err(e) => {
                job.state = JobState::Failed;
                job.log_excerpt = Some(e.to_string());
            }
        }
        if let Err(e) = shared.store.save(&job) {
            tracing::error!(operation = "job_save", job_id = %job.id, error = %e, "failed to persist job state");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for job state");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn store_roundtrips_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf());
        let job = JobRecord::new("refresh", serde_json::json!({"collection": "personal"}));
        store.save(&job).unwrap();
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn runner_completes_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new(
            dir.path(),
            8,
            Box::new(|job| Ok(format!("done: {}", job.kind))),
        );
        runner.start().unwrap();

        let job = JobRecord::new("deploy-many", serde_json::json!({}));
        let id = job.id.clone();
        runner.enqueue(job).unwrap();

        wait_for(|| {
            runner
                .store()
                .get(&id)
                .unwrap()
                .is_some_and(|j| j.state == JobState::Completed)
        });
        let done = runner.store().get(&id).unwrap().unwrap();
        assert_eq!(done.log_excerpt.as_deref(), Some("done: deploy-many"));
        assert!(done.started_at.is_some());
        assert!(done.ended_at.is_some());
    }

    #[test]
    fn runner_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new(
            dir.path(),
            8,
            Box::new(|_| {
                Err(VaultError::Integrity {
                    detail: "boom".to_owned(),
                })
            }),
        );
        runner.start().unwrap();

        let job = JobRecord::new("refresh", serde_json::json!({}));
        let id = job.id.clone();
        runner.enqueue(job).unwrap();

        wait_for(|| {
            runner
                .store()
                .get(&id)
                .unwrap()
                .is_some_and(|j| j.state == JobState::Failed)
        });
        let failed = runner.store().get(&id).unwrap().unwrap();
        assert!(failed.log_excerpt.unwrap().contains("boom"));
    }

    #[test]
    fn backpressure_rejects_when_full() {
        let dir = tempfile::tempdir().unwrap();
        // Runner never started: the queue only fills.
        let runner = JobRunner::new(dir.path(), 2, Box::new(|_| Ok(String::new())));
        runner.enqueue(JobRecord::new("a", serde_json::json!({}))).unwrap();
        runner.enqueue(JobRecord::new("b", serde_json::json!({}))).unwrap();
        let err = runner
            .enqueue(JobRecord::new("c", serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, VaultError::Backpressure { limit: 2 }));
    }

    #[test]
    fn recover_requeues_interrupted_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf());

        // Simulate a crash: one job left running, one queued, one done.
        let mut running = JobRecord::new("deploy-many", serde_json::json!({}));
        running.state = JobState::Running;
        store.save(&running).unwrap();
        let queued = JobRecord::new("refresh", serde_json::json!({}));
        store.save(&queued).unwrap();
        let mut done = JobRecord::new("refresh", serde_json::json!({}));
        done.state = JobState::Completed;
        store.save(&done).unwrap();

        let recovered = store.recover_incomplete().unwrap();
        assert_eq!(recovered.len(), 2);
        assert!(recovered.iter().all(|j| j.state == JobState::Queued));

        // A fresh runner picks them back up.
        let runner = JobRunner::new(dir.path(), 8, Box::new(|_| Ok("resumed".to_owned())));
        runner.start().unwrap();
        let running_id = running.id.clone();
        wait_for(|| {
            runner
                .store()
                .get(&running_id)
                .unwrap()
                .is_some_and(|j| j.state == JobState::Completed)
        });
    }

    #[test]
    fn cancel_queued_job() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new(dir.path(), 8, Box::new(|_| Ok(String::new())));
        // Not started; the job stays queued.
        let job = JobRecord::new("refresh", serde_json::json!({}));
        let id = job.id.clone();
        runner.enqueue(job).unwrap();
        runner.cancel(&id).unwrap();
        let cancelled = runner.store().get(&id).unwrap().unwrap();
        assert_eq!(cancelled.state, JobState::Canceled);
    }
}
