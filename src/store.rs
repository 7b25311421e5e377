//! Job store: the single source of truth for the set of known jobs.
//!
//! One async mutex guards both the in-memory map and the persistence
//! debounce handle. Every mutation bumps `updatedAt` and schedules a flush
//! of the full JSON snapshot after a short delay; a newer mutation cancels
//! and reschedules the pending flush. The flush snapshots under the lock
//! and writes outside it.
//!
//! On startup the snapshot is read back; jobs interrupted mid-render
//! (`PROCESSING`) are rewritten to `QUEUED` with progress 0 so the
//! scheduler picks them up again.

use crate::error::RenderError;
use crate::job::{Clock, Job, JobStatus, QueueStats};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay between a mutation and the snapshot write it schedules.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(100);

struct StoreInner {
    jobs: HashMap<String, Job>,
    flush_task: Option<JoinHandle<()>>,
}

pub struct JobStore {
    inner: Arc<Mutex<StoreInner>>,
    snapshot_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl Clone for JobStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            snapshot_path: self.snapshot_path.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl JobStore {
    /// Open the store, loading the snapshot at `snapshot_path` if present.
    /// A corrupted snapshot is logged and treated as empty.
    pub async fn open(snapshot_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        let mut jobs = HashMap::new();
        let mut recovered = 0usize;

        match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<Job>>(&bytes) {
                Ok(records) => {
                    for mut job in records {
                        if job.status == JobStatus::Processing {
                            // Its browser work died with the previous process.
                            job.status = JobStatus::Queued;
                            job.progress = 0;
                            job.updated_at = clock.now();
                            recovered += 1;
                        }
                        jobs.insert(job.key.clone(), job);
                    }
                }
                Err(e) => {
                    warn!(
                        "Corrupted job snapshot at {}, starting empty: {}",
                        snapshot_path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    "Failed to read job snapshot at {}: {}",
                    snapshot_path.display(),
                    e
                );
            }
        }

        if !jobs.is_empty() {
            info!(
                "Loaded {} job(s) from {} ({} re-queued after interruption)",
                jobs.len(),
                snapshot_path.display(),
                recovered
            );
        }

        let store = Self {
            inner: Arc::new(Mutex::new(StoreInner {
                jobs,
                flush_task: None,
            })),
            snapshot_path,
            clock,
        };

        if recovered > 0 {
            let mut inner = store.inner.lock().await;
            store.schedule_flush(&mut inner);
        }

        store
    }

    pub async fn put(&self, job: Job) {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.key.clone(), job);
        self.schedule_flush(&mut inner);
    }

    pub async fn get(&self, key: &str) -> Option<Job> {
        self.inner.lock().await.jobs.get(key).cloned()
    }

    pub async fn delete(&self, key: &str) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let removed = inner.jobs.remove(key);
        if removed.is_some() {
            self.schedule_flush(&mut inner);
        }
        removed
    }

    /// Admission check and insert in one lock acquisition, so two racing
    /// submissions of the same key can never both create a job.
    ///
    /// Returns the existing record for an idempotent hit on a `COMPLETED`
    /// job, a duplicate-key error while a non-terminal job holds the key,
    /// and a queue-full error when a new key would push the store past
    /// `max_size`. A `FAILED` or `CANCELLED` record is replaced in place.
    pub async fn admit(&self, job: Job, max_size: usize) -> Result<Job, RenderError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get(&job.key) {
            Some(existing) if existing.status == JobStatus::Completed => {
                return Ok(existing.clone());
            }
            Some(existing) if !existing.status.is_terminal() => {
                return Err(RenderError::DuplicateKey(job.key.clone()));
            }
            Some(_) => {} // terminal failure or cancellation: replace
            None => {
                if inner.jobs.len() >= max_size {
                    return Err(RenderError::QueueFull(max_size));
                }
            }
        }
        inner.jobs.insert(job.key.clone(), job.clone());
        self.schedule_flush(&mut inner);
        Ok(job)
    }

    /// Delete the job under `key` only when `predicate` accepts the current
    /// record. Returns the removed job. The check and the removal happen
    /// under one lock acquisition.
    pub async fn delete_if<F>(&self, key: &str, predicate: F) -> Option<Job>
    where
        F: FnOnce(&Job) -> bool,
    {
        let mut inner = self.inner.lock().await;
        let accepted = match inner.jobs.get(key) {
            Some(job) => predicate(job),
            None => false,
        };
        if !accepted {
            return None;
        }
        let removed = inner.jobs.remove(key);
        self.schedule_flush(&mut inner);
        removed
    }

    /// Snapshot of every job record.
    pub async fn list(&self) -> Vec<Job> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    /// Atomically transform the job under `key`, bumping `updatedAt`.
    /// Returns the updated record, or `None` when the key is unknown.
    pub async fn update<F>(&self, key: &str, mutate: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(key)?;
        mutate(job);
        job.updated_at = self.clock.now();
        let updated = job.clone();
        self.schedule_flush(&mut inner);
        Some(updated)
    }

    /// Reserve the job for a worker: `QUEUED -> PROCESSING`, a no-op
    /// returning false for any other current status.
    pub async fn mark_as_processing(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(key) else {
            return false;
        };
        if job.status != JobStatus::Queued {
            return false;
        }
        job.status = JobStatus::Processing;
        job.updated_at = self.clock.now();
        self.schedule_flush(&mut inner);
        true
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats {
            total: inner.jobs.len(),
            ..QueueStats::default()
        };
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Delete terminal jobs whose `updatedAt` is older than `age`. Returns
    /// the number deleted. Artifact files are left alone; that is external
    /// housekeeping.
    pub async fn cleanup_older_than(&self, age: chrono::Duration) -> usize {
        let cutoff = self.clock.now() - age;
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        let deleted = before - inner.jobs.len();
        if deleted > 0 {
            debug!("Cleaned up {deleted} terminal job(s)");
            self.schedule_flush(&mut inner);
        }
        deleted
    }

    /// Write the snapshot immediately, superseding any pending flush.
    /// Used on shutdown.
    pub async fn flush_now(&self) {
        let records = {
            let mut inner = self.inner.lock().await;
            if let Some(task) = inner.flush_task.take() {
                task.abort();
            }
            snapshot_records(&inner)
        };
        write_snapshot(&self.snapshot_path, &records).await;
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Cancel-and-reschedule debounce: the newest mutation owns the timer.
    fn schedule_flush(&self, inner: &mut StoreInner) {
        if let Some(task) = inner.flush_task.take() {
            task.abort();
        }
        let store_inner = self.inner.clone();
        let path = self.snapshot_path.clone();
        inner.flush_task = Some(tokio::spawn(async move {
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            let records = {
                let mut inner = store_inner.lock().await;
                inner.flush_task = None;
                snapshot_records(&inner)
            };
            write_snapshot(&path, &records).await;
        }));
    }
}

fn snapshot_records(inner: &StoreInner) -> Vec<Job> {
    let mut records: Vec<Job> = inner.jobs.values().cloned().collect();
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
    records
}

/// Best-effort write: failures are logged, never propagated to the mutation
/// that scheduled them. The next flush retries.
async fn write_snapshot(path: &Path, records: &[Job]) {
    let result: Result<(), RenderError> = async {
        let bytes = serde_json::to_vec_pretty(records)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename keeps the snapshot whole even if this task is
        // superseded mid-write.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => debug!("Flushed {} job(s) to {}", records.len(), path.display()),
        Err(e) => warn!("Failed to flush job snapshot to {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, RenderOptions, SourceKind, SystemClock};
    use chrono::Utc;
    use tempfile::TempDir;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    fn job(key: &str, status: JobStatus) -> Job {
        let mut job = Job::new(
            key.to_string(),
            JobKind::Pdf,
            SourceKind::InlineHtml,
            "<p>test</p>".to_string(),
            RenderOptions::default(),
            Utc::now(),
        );
        job.status = status;
        job
    }

    async fn open(dir: &TempDir) -> JobStore {
        JobStore::open(dir.path().join("jobs.json"), clock()).await
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.put(job("a", JobStatus::Queued)).await;
        assert_eq!(store.get("a").await.unwrap().key, "a");
        assert_eq!(store.len().await, 1);

        assert!(store.delete("a").await.is_some());
        assert!(store.get("a").await.is_none());
        assert!(store.delete("a").await.is_none());
    }

    #[tokio::test]
    async fn update_bumps_updated_at() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.put(job("a", JobStatus::Queued)).await;

        let before = store.get("a").await.unwrap().updated_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let updated = store
            .update("a", |j| j.progress = 40)
            .await
            .unwrap();
        assert_eq!(updated.progress, 40);
        assert!(updated.updated_at > before);

        assert!(store.update("missing", |_| {}).await.is_none());
    }

    #[tokio::test]
    async fn mark_as_processing_is_queued_only() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.put(job("a", JobStatus::Queued)).await;

        assert!(store.mark_as_processing("a").await);
        assert_eq!(store.get("a").await.unwrap().status, JobStatus::Processing);

        // Second reservation must fail, as must reserving a cancelled job.
        assert!(!store.mark_as_processing("a").await);
        store.put(job("b", JobStatus::Cancelled)).await;
        assert!(!store.mark_as_processing("b").await);
        assert!(!store.mark_as_processing("missing").await);
    }

    #[tokio::test]
    async fn debounced_flush_reaches_disk() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.put(job("a", JobStatus::Queued)).await;

        tokio::time::sleep(FLUSH_DEBOUNCE + Duration::from_millis(100)).await;
        let bytes = tokio::fs::read(store.snapshot_path()).await.unwrap();
        let records: Vec<Job> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a");
    }

    #[tokio::test]
    async fn recovery_requeues_interrupted_jobs() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.put(job("queued", JobStatus::Queued)).await;
            let mut processing = job("processing", JobStatus::Processing);
            processing.progress = 40;
            store.put(processing).await;
            let mut completed = job("completed", JobStatus::Completed);
            completed.progress = 100;
            completed.file_path = Some("/tmp/out.pdf".into());
            store.put(completed).await;
            store.flush_now().await;
        }

        let store = open(&dir).await;
        assert_eq!(store.len().await, 3);

        let requeued = store.get("processing").await.unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.progress, 0);

        let queued = store.get("queued").await.unwrap();
        assert_eq!(queued.status, JobStatus::Queued);

        let completed = store.get("completed").await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.progress, 100);
        assert_eq!(completed.file_path.as_deref(), Some("/tmp/out.pdf"));
    }

    #[tokio::test]
    async fn corrupted_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = JobStore::open(path, clock()).await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn cleanup_deletes_only_old_terminal_jobs() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut old_completed = job("old-completed", JobStatus::Completed);
        old_completed.updated_at = Utc::now() - chrono::Duration::hours(48);
        store.put(old_completed).await;

        let mut old_queued = job("old-queued", JobStatus::Queued);
        old_queued.updated_at = Utc::now() - chrono::Duration::hours(48);
        store.put(old_queued).await;

        store.put(job("fresh-failed", JobStatus::Failed)).await;

        let deleted = store.cleanup_older_than(chrono::Duration::hours(24)).await;
        assert_eq!(deleted, 1);
        assert!(store.get("old-completed").await.is_none());
        assert!(store.get("old-queued").await.is_some());
        assert!(store.get("fresh-failed").await.is_some());
    }

    #[tokio::test]
    async fn admit_is_idempotent_on_completed() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut done = job("x", JobStatus::Completed);
        done.progress = 100;
        done.file_path = Some("/out/x__10-00-00.pdf".into());
        store.put(done).await;

        let admitted = store.admit(job("x", JobStatus::Queued), 10).await.unwrap();
        assert_eq!(admitted.status, JobStatus::Completed);
        assert_eq!(admitted.file_path.as_deref(), Some("/out/x__10-00-00.pdf"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn admit_rejects_duplicate_live_keys() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.put(job("x", JobStatus::Queued)).await;

        let err = store.admit(job("x", JobStatus::Queued), 10).await.unwrap_err();
        assert!(matches!(err, RenderError::DuplicateKey(_)));

        store
            .update("x", |j| j.status = JobStatus::Processing)
            .await;
        let err = store.admit(job("x", JobStatus::Queued), 10).await.unwrap_err();
        assert!(matches!(err, RenderError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn admit_replaces_failed_and_cancelled_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let mut failed = job("x", JobStatus::Failed);
        failed.error = Some("boom".into());
        store.put(failed).await;

        let admitted = store.admit(job("x", JobStatus::Queued), 10).await.unwrap();
        assert_eq!(admitted.status, JobStatus::Queued);
        assert!(store.get("x").await.unwrap().error.is_none());
    }

    #[tokio::test]
    async fn admit_enforces_capacity_counting_all_entries() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.put(job("done", JobStatus::Completed)).await;
        store.put(job("live", JobStatus::Queued)).await;

        // Terminal entries count against the cap.
        let err = store.admit(job("new", JobStatus::Queued), 2).await.unwrap_err();
        assert!(matches!(err, RenderError::QueueFull(2)));

        // Replacing a terminal record does not grow the store, so it passes.
        store
            .update("done", |j| j.status = JobStatus::Cancelled)
            .await;
        assert!(store.admit(job("done", JobStatus::Queued), 2).await.is_ok());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.put(job("a", JobStatus::Queued)).await;
        store.put(job("b", JobStatus::Queued)).await;
        store.put(job("c", JobStatus::Processing)).await;
        store.put(job("d", JobStatus::Failed)).await;

        let stats = store.stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }
}
