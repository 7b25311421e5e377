//! The render service: submission facade and per-kind subsystem wiring.
//!
//! PDF and screenshot rendering are two instances of the same subsystem
//! (store, scheduler, worker pool, shared browser), differing only in
//! the injected [`Renderer`]. The facade validates and sanitizes incoming
//! submissions, resolves idempotency, and exposes status, cancellation,
//! removal, stats, and artifact download over both.

use crate::artifact::{self, ArtifactHandle};
use crate::browser_pool::BrowserPool;
use crate::config::Config;
use crate::error::RenderError;
use crate::job::{
    validate_key, Clock, Job, JobKind, JobStatus, JobView, QueueStats, RenderOptions, SourceKind,
    SystemClock,
};
use crate::metrics::RenderMetrics;
use crate::renderer::{PdfRenderer, Renderer, ScreenshotRenderer};
use crate::safety::{BasicHtmlSanitizer, HtmlSanitizer, SchemeUrlValidator, UrlValidator};
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use crate::worker::spawn_workers;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub(crate) struct RenderSubsystem {
    pub(crate) store: JobStore,
    pub(crate) scheduler: Scheduler,
    pub(crate) pool: BrowserPool,
    pub(crate) renderer: Arc<dyn Renderer>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl RenderSubsystem {
    async fn new(
        renderer: Arc<dyn Renderer>,
        config: Config,
        clock: Arc<dyn Clock>,
        metrics: Arc<RenderMetrics>,
    ) -> Self {
        let kind = renderer.kind();
        let snapshot_path = config
            .storage
            .state_dir
            .join(format!("{}-jobs.json", kind.as_str()));
        let store = JobStore::open(snapshot_path, clock.clone()).await;
        let (scheduler, dispatch_rx) = Scheduler::new(store.clone(), config.browser.max_concurrent);
        let pool = BrowserPool::new(config.clone(), kind.as_str());
        let worker_handles = spawn_workers(
            config.browser.max_concurrent,
            store.clone(),
            scheduler.clone(),
            pool.clone(),
            renderer.clone(),
            config,
            clock,
            metrics,
            dispatch_rx,
        );

        // Jobs recovered from the snapshot as QUEUED resume here.
        scheduler.trigger();

        Self {
            store,
            scheduler,
            pool,
            renderer,
            worker_handles,
        }
    }

    async fn shutdown(&self) {
        self.pool.close().await;
        for handle in &self.worker_handles {
            handle.abort();
        }
        // Workers are quiet now, so this write captures the final state.
        self.store.flush_now().await;
    }
}

pub struct RenderService {
    pdf: RenderSubsystem,
    screenshot: RenderSubsystem,
    config: Config,
    clock: Arc<dyn Clock>,
    url_validator: Arc<dyn UrlValidator>,
    html_sanitizer: Arc<dyn HtmlSanitizer>,
    metrics: Arc<RenderMetrics>,
}

impl RenderService {
    pub async fn new(config: Config) -> Result<Self, RenderError> {
        Self::with_parts(
            config,
            Arc::new(SystemClock),
            Arc::new(SchemeUrlValidator),
            Arc::new(BasicHtmlSanitizer::default()),
        )
        .await
    }

    /// Construct with injected clock and safety seams.
    pub async fn with_parts(
        config: Config,
        clock: Arc<dyn Clock>,
        url_validator: Arc<dyn UrlValidator>,
        html_sanitizer: Arc<dyn HtmlSanitizer>,
    ) -> Result<Self, RenderError> {
        config.validate()?;
        let metrics = Arc::new(RenderMetrics::new());

        let pdf = RenderSubsystem::new(
            Arc::new(PdfRenderer::new(config.pdf.clone())),
            config.clone(),
            clock.clone(),
            metrics.clone(),
        )
        .await;
        let screenshot = RenderSubsystem::new(
            Arc::new(ScreenshotRenderer::new()),
            config.clone(),
            clock.clone(),
            metrics.clone(),
        )
        .await;

        info!(
            "Render service ready (max {} concurrent per kind, queue cap {})",
            config.browser.max_concurrent, config.queue.max_size
        );

        Ok(Self {
            pdf,
            screenshot,
            config,
            clock,
            url_validator,
            html_sanitizer,
            metrics,
        })
    }

    pub(crate) fn subsystem(&self, kind: JobKind) -> &RenderSubsystem {
        match kind {
            JobKind::Pdf => &self.pdf,
            JobKind::Screenshot => &self.screenshot,
        }
    }

    pub async fn submit_pdf(
        &self,
        key: &str,
        source_kind: SourceKind,
        source: String,
        options: RenderOptions,
        re_create: bool,
    ) -> Result<Job, RenderError> {
        self.submit(JobKind::Pdf, key, source_kind, source, options, re_create)
            .await
    }

    pub async fn submit_screenshot(
        &self,
        key: &str,
        source_kind: SourceKind,
        source: String,
        options: RenderOptions,
        re_create: bool,
    ) -> Result<Job, RenderError> {
        self.submit(
            JobKind::Screenshot,
            key,
            source_kind,
            source,
            options,
            re_create,
        )
        .await
    }

    /// Validate, sanitize, de-duplicate, enqueue.
    ///
    /// Two racing submissions of one key resolve to the existing completed
    /// result, a single new job, or one success and one duplicate-key
    /// failure, never two jobs (admission is atomic in the store).
    async fn submit(
        &self,
        kind: JobKind,
        key: &str,
        source_kind: SourceKind,
        source: String,
        options: RenderOptions,
        re_create: bool,
    ) -> Result<Job, RenderError> {
        validate_key(key)?;
        options.validate()?;

        let source = match source_kind {
            SourceKind::RemoteUrl => self.url_validator.validate(&source)?,
            SourceKind::InlineHtml | SourceKind::UploadedHtml => {
                self.html_sanitizer.sanitize(&source)?
            }
        };

        let subsystem = self.subsystem(kind);
        if re_create {
            // Drop the previous record and its artifact. A job currently
            // processing refuses removal and will surface as duplicate-key.
            subsystem.scheduler.remove(key).await;
        }

        let job = Job::new(
            key.to_string(),
            kind,
            source_kind,
            source,
            options,
            self.clock.now(),
        );
        let admitted = subsystem
            .store
            .admit(job, self.config.queue.max_size)
            .await?;

        if admitted.status == JobStatus::Completed {
            // Idempotent hit: hand back the existing result untouched.
            return Ok(admitted);
        }

        self.metrics.set_queue_size(subsystem.store.len().await);
        subsystem.scheduler.trigger();
        Ok(admitted)
    }

    pub async fn get_status(&self, kind: JobKind, key: &str) -> Option<JobView> {
        self.subsystem(kind)
            .store
            .get(key)
            .await
            .map(|job| JobView::from(&job))
    }

    pub async fn cancel(&self, kind: JobKind, key: &str) -> bool {
        self.subsystem(kind).scheduler.cancel(key).await
    }

    pub async fn remove(&self, kind: JobKind, key: &str) -> bool {
        self.subsystem(kind).scheduler.remove(key).await
    }

    pub async fn queue_stats(&self, kind: JobKind) -> QueueStats {
        self.subsystem(kind).store.stats().await
    }

    pub async fn open_artifact(
        &self,
        kind: JobKind,
        key: &str,
    ) -> Result<ArtifactHandle, RenderError> {
        let subsystem = self.subsystem(kind);
        artifact::open_artifact(&subsystem.store, subsystem.renderer.as_ref(), key).await
    }

    /// Delete terminal jobs older than the configured cleanup age from both
    /// stores. Returns (pdf, screenshot) deletion counts.
    pub async fn cleanup(&self) -> (usize, usize) {
        self.cleanup_older_than(self.config.cleanup_age()).await
    }

    pub async fn cleanup_older_than(&self, age: chrono::Duration) -> (usize, usize) {
        let pdf = self.pdf.store.cleanup_older_than(age).await;
        let screenshot = self.screenshot.store.cleanup_older_than(age).await;
        (pdf, screenshot)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop accepting browser work and persist state. Active workers see a
    /// closed browser on their next call and finish as failed attempts.
    pub async fn shutdown(&self) {
        info!("Shutting down render service");
        self.pdf.shutdown().await;
        self.screenshot.shutdown().await;
        info!("Render service shutdown complete");
    }
}
