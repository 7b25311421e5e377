//! Job scheduling: who runs next, and when.
//!
//! There is no separate queue structure; the store is the queue. A
//! coalescing trigger (bounded channel of capacity 1) wakes the dispatch
//! loop, which runs one selection pass: pick the single best `QUEUED` job
//! under (priority desc, createdAt asc, key asc), respect the per-kind
//! concurrency ceiling, and hand the key to a worker. Workers re-trigger
//! when a job reaches a terminal state.
//!
//! Between dispatch and the worker's `mark_as_processing` the job is
//! tracked in an in-flight set so a selection pass can neither exceed the
//! ceiling nor re-dispatch the same job.

use crate::job::{Job, JobStatus};
use crate::store::JobStore;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct Scheduler {
    store: JobStore,
    trigger_tx: mpsc::Sender<()>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            trigger_tx: self.trigger_tx.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl Scheduler {
    /// Create the scheduler and spawn its dispatch loop. The returned
    /// receiver carries the keys of jobs selected for execution; workers
    /// share it.
    pub fn new(store: JobStore, max_concurrent: usize) -> (Self, mpsc::Receiver<String>) {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (process_tx, process_rx) = mpsc::channel::<String>(max_concurrent.max(1));
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let scheduler = Self {
            store: store.clone(),
            trigger_tx,
            in_flight: in_flight.clone(),
        };

        tokio::spawn(async move {
            while trigger_rx.recv().await.is_some() {
                // Each pass picks at most one job; passes repeat until the
                // ceiling is hit or nothing is runnable, so a single wake-up
                // (e.g. the post-recovery ping) fills every free slot.
                loop {
                    let jobs = store.list().await;
                    let selected = {
                        let mut in_flight = in_flight.lock().unwrap();
                        match select_next(&jobs, max_concurrent, &in_flight) {
                            Some(job) => {
                                in_flight.insert(job.key.clone());
                                Some(job.key.clone())
                            }
                            None => None,
                        }
                    };

                    let Some(key) = selected else { break };
                    debug!("Selected job '{key}' for processing");
                    if process_tx.send(key.clone()).await.is_err() {
                        in_flight.lock().unwrap().remove(&key);
                        return;
                    }
                    // Let workers reserve what was just dispatched before
                    // the next pass reads the store.
                    tokio::task::yield_now().await;
                }
            }
        });

        (scheduler, process_rx)
    }

    /// Request a selection pass. Coalesces: if a pass is already pending,
    /// this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Mark the job cancelled unless it is already terminal. A `PROCESSING`
    /// job keeps running until its worker hits the next cancellation
    /// checkpoint; a `QUEUED` job becomes unselectable immediately.
    pub async fn cancel(&self, key: &str) -> bool {
        let mut cancelled = false;
        self.store
            .update(key, |job| {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Cancelled;
                    cancelled = true;
                }
            })
            .await;
        if cancelled {
            debug!("Job '{key}' cancelled");
        }
        cancelled
    }

    /// Delete the job record and its artifact file. Refused (returns false)
    /// while the job is `PROCESSING`; unknown keys also return false.
    pub async fn remove(&self, key: &str) -> bool {
        let Some(job) = self.store.get(key).await else {
            return false;
        };
        if job.status == JobStatus::Processing {
            warn!("Refusing to remove job '{key}' while it is processing");
            return false;
        }

        // The artifact goes first so a removed record never leaves a stray
        // file behind.
        if let Some(path) = &job.file_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete artifact '{path}' for job '{key}': {e}");
                }
            }
        }

        self.store
            .delete_if(key, |job| job.status != JobStatus::Processing)
            .await
            .is_some()
    }

    /// Called by a worker once it has attempted to reserve the dispatched
    /// job, releasing the in-flight slot.
    pub(crate) fn dispatch_settled(&self, key: &str) {
        self.in_flight.lock().unwrap().remove(key);
    }
}

/// One selection pass over a store snapshot. Returns the unique maximum
/// under (priority desc, createdAt asc, key asc) among ready jobs, or
/// `None` when the concurrency ceiling leaves no slot.
fn select_next<'a>(
    jobs: &'a [Job],
    max_concurrent: usize,
    in_flight: &HashSet<String>,
) -> Option<&'a Job> {
    let processing = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Processing)
        .count();
    if processing + in_flight.len() >= max_concurrent {
        return None;
    }

    jobs.iter()
        .filter(|j| j.status == JobStatus::Queued && !in_flight.contains(&j.key))
        .min_by_key(|j| (Reverse(j.priority), j.created_at, j.key.clone()))
}
