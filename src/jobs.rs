use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::{
    error::AppError,
    models::jobs::{JobProgress, JobStatus},
};

struct JobEntry {
    progress: JobProgress,
    cancel: Arc<AtomicBool>,
    finished_at: Option<Instant>,
}

/// Thread-safe store mapping a job id to its live progress snapshot.
///
/// Exactly one writer mutates a given job (the worker running it) while any
/// number of pollers read it. Every mutation happens under the write lock
/// and every read clones the snapshot under the read lock, so a poller sees
/// either the pre- or post-update state, never a torn mix of fields. The
/// critical sections never await.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
    retention: Option<Duration>,
}

impl JobRegistry {
    /// `retention` of `None` keeps finished jobs for the process lifetime;
    /// `Some(window)` evicts jobs that have been terminal for longer than
    /// the window whenever a new job is created.
    pub fn new(retention: Option<Duration>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Allocates a Pending job and returns its id. A non-empty supplied id
    /// is used as-is; reusing the id of a job that is still tracked is
    /// rejected rather than silently clobbering it.
    pub fn create(&self, total: u64, supplied_id: Option<&str>) -> Result<String, AppError> {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");

        if let Some(window) = self.retention {
            let now = Instant::now();
            jobs.retain(|_, entry| match entry.finished_at {
                Some(at) => now.duration_since(at) < window,
                None => true,
            });
        }

        let id = match supplied_id {
            Some(supplied) if !supplied.is_empty() => {
                if jobs.contains_key(supplied) {
                    return Err(AppError::BadRequest(format!(
                        "job id already in use: {supplied}"
                    )));
                }
                supplied.to_string()
            }
            _ => Uuid::new_v4().simple().to_string(),
        };

        jobs.insert(
            id.clone(),
            JobEntry {
                progress: JobProgress {
                    processed: 0,
                    total,
                    status: JobStatus::Pending,
                    message: String::new(),
                },
                cancel: Arc::new(AtomicBool::new(false)),
                finished_at: None,
            },
        );

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<JobProgress> {
        let jobs = self.jobs.read().expect("job registry lock poisoned");
        jobs.get(id).map(|entry| entry.progress.clone())
    }

    /// Marks the job InProgress. No-op for unknown or already-terminal jobs.
    pub fn begin(&self, id: &str) {
        self.mutate(id, |progress| {
            progress.status = JobStatus::InProgress;
            progress.message = "Starting import...".to_string();
        });
    }

    pub fn set_message(&self, id: &str, message: String) {
        self.mutate(id, |progress| progress.message = message);
    }

    /// Increments `processed` by one, saturating at `total`.
    pub fn advance(&self, id: &str) {
        self.mutate(id, |progress| {
            if progress.processed < progress.total {
                progress.processed += 1;
            }
        });
    }

    /// Moves the job to a terminal status and freezes it.
    pub fn finish(&self, id: &str, status: JobStatus, message: String) {
        debug_assert!(status.is_terminal());
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        if let Some(entry) = jobs.get_mut(id)
            && !entry.progress.status.is_terminal()
        {
            entry.progress.status = status;
            entry.progress.message = message;
            entry.finished_at = Some(Instant::now());
        }
    }

    /// Requests cancellation; the running worker checks the flag between
    /// items. Returns false for an unknown job id.
    pub fn cancel(&self, id: &str) -> bool {
        let jobs = self.jobs.read().expect("job registry lock poisoned");
        match jobs.get(id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        let jobs = self.jobs.read().expect("job registry lock poisoned");
        jobs.get(id)
            .map(|entry| entry.cancel.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn mutate(&self, id: &str, apply: impl FnOnce(&mut JobProgress)) {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        if let Some(entry) = jobs.get_mut(id)
            && !entry.progress.status.is_terminal()
        {
            apply(&mut entry.progress);
        }
    }
}
