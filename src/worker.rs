//! Render workers: one job at a time, driven by the scheduler.
//!
//! A worker drains keys from the shared dispatch channel, reserves the job
//! (`QUEUED -> PROCESSING`), then drives the browser through page setup,
//! content load, pre-capture waits, a cancellation checkpoint, capture, and
//! the artifact write. Each attempt is bounded by the configured processing
//! timeout; failed attempts are retried with a delay, and only the last
//! failure reaches the store. Pages and dedicated browsers are released on
//! every exit path, including timeouts.

use crate::browser_pool::{self, BrowserPool, DedicatedBrowser};
use crate::config::Config;
use crate::error::RenderError;
use crate::job::{Clock, Job, JobKind, JobStatus, ScaleMode, SourceKind};
use crate::metrics::RenderMetrics;
use crate::naming;
use crate::renderer::Renderer;
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use chromiumoxide::cdp::browser_protocol::emulation::{
    MediaFeature, SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const DISABLE_ANIMATIONS_CSS: &str = "*, *::before, *::after { \
     animation: none !important; \
     animation-duration: 0s !important; \
     animation-delay: 0s !important; \
     transition: none !important; \
     transition-duration: 0s !important; \
     transition-delay: 0s !important; }";

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Idle window granted to subresources after `set_content` replaces the
/// document.
const SET_CONTENT_SETTLE: Duration = Duration::from_millis(500);

enum AttemptOutcome {
    Completed,
    Cancelled,
}

pub struct RenderWorker {
    id: usize,
    store: JobStore,
    scheduler: Scheduler,
    pool: BrowserPool,
    renderer: Arc<dyn Renderer>,
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<RenderMetrics>,
}

impl Clone for RenderWorker {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            pool: self.pool.clone(),
            renderer: self.renderer.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Spawn `count` workers draining one shared dispatch receiver.
#[allow(clippy::too_many_arguments)]
pub fn spawn_workers(
    count: usize,
    store: JobStore,
    scheduler: Scheduler,
    pool: BrowserPool,
    renderer: Arc<dyn Renderer>,
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<RenderMetrics>,
    dispatch_rx: mpsc::Receiver<String>,
) -> Vec<JoinHandle<()>> {
    let shared_rx = Arc::new(Mutex::new(dispatch_rx));
    (0..count)
        .map(|id| {
            let worker = RenderWorker {
                id,
                store: store.clone(),
                scheduler: scheduler.clone(),
                pool: pool.clone(),
                renderer: renderer.clone(),
                config: config.clone(),
                clock: clock.clone(),
                metrics: metrics.clone(),
            };
            let rx = shared_rx.clone();
            tokio::spawn(async move { worker.run(rx).await })
        })
        .collect()
}

impl RenderWorker {
    pub async fn run(&self, dispatch_rx: Arc<Mutex<mpsc::Receiver<String>>>) {
        debug!("Render worker {} ({}) started", self.id, self.renderer.kind());
        loop {
            let key = {
                let mut rx = dispatch_rx.lock().await;
                rx.recv().await
            };
            match key {
                Some(key) => self.process(key).await,
                None => break,
            }
        }
        debug!("Render worker {} stopped", self.id);
    }

    async fn process(&self, key: String) {
        let reserved = self.store.mark_as_processing(&key).await;
        self.scheduler.dispatch_settled(&key);
        if !reserved {
            // Cancelled or removed between selection and execution.
            debug!("Worker {}: job '{key}' no longer runnable", self.id);
            self.scheduler.trigger();
            return;
        }

        match self.store.get(&key).await {
            Some(job) => self.run_attempts(job).await,
            None => debug!("Worker {}: job '{key}' vanished after reservation", self.id),
        }

        // Free slot: let the scheduler pick the next job.
        self.scheduler.trigger();
    }

    async fn run_attempts(&self, job: Job) {
        let total_attempts = self.config.queue.retry_attempts as usize + 1;
        let started = Instant::now();

        let mut final_error = None;
        for attempt in 1..=total_attempts {
            match self.run_attempt(&job).await {
                Ok(AttemptOutcome::Completed) => {
                    info!(
                        "Job '{}' ({}) completed in {:?}",
                        job.key,
                        job.kind,
                        started.elapsed()
                    );
                    self.metrics.record_completed(started.elapsed());
                    return;
                }
                Ok(AttemptOutcome::Cancelled) => {
                    info!("Job '{}' ({}) cancelled during processing", job.key, job.kind);
                    self.metrics.record_cancelled();
                    return;
                }
                Err(e) => {
                    if attempt == total_attempts || !e.is_retryable() {
                        final_error = Some(e);
                        break;
                    }
                    warn!(
                        "Job '{}' attempt {attempt}/{total_attempts} failed: {e}, retrying in {:?}",
                        job.key,
                        self.config.retry_delay()
                    );
                    self.metrics.record_retry();
                    sleep(self.config.retry_delay()).await;

                    // A cancel that landed during the failed attempt or the
                    // retry sleep wins over further attempts.
                    let current = self.store.get(&job.key).await;
                    if matches!(current, Some(ref j) if j.status == JobStatus::Cancelled) {
                        info!("Job '{}' cancelled between attempts", job.key);
                        self.metrics.record_cancelled();
                        return;
                    }
                }
            }
        }

        let message = final_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "render failed".to_string());
        warn!("Job '{}' ({}) failed: {message}", job.key, job.kind);
        self.metrics.record_failed();
        self.store
            .update(&job.key, |j| {
                j.status = JobStatus::Failed;
                j.error = Some(message.clone());
            })
            .await;
    }

    /// One bounded attempt. Cleanup of the page and any dedicated browser
    /// happens here, outside the deadline, so a timed-out attempt still
    /// releases its browser resources.
    async fn run_attempt(&self, job: &Job) -> Result<AttemptOutcome, RenderError> {
        let deadline = self.config.processing_timeout();
        let page_slot: Arc<Mutex<Option<Page>>> = Arc::new(Mutex::new(None));
        let dedicated_slot: Arc<Mutex<Option<DedicatedBrowser>>> = Arc::new(Mutex::new(None));

        let result = timeout(deadline, self.attempt(job, &page_slot, &dedicated_slot)).await;

        if let Some(page) = page_slot.lock().await.take() {
            let _ = page.close().await;
        }
        if let Some(dedicated) = dedicated_slot.lock().await.take() {
            dedicated.close().await;
        }

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(RenderError::TimedOut(deadline)),
        }
    }

    async fn attempt(
        &self,
        job: &Job,
        page_slot: &Arc<Mutex<Option<Page>>>,
        dedicated_slot: &Arc<Mutex<Option<DedicatedBrowser>>>,
    ) -> Result<AttemptOutcome, RenderError> {
        match self.drive(job, page_slot, dedicated_slot).await {
            Err(e) if job.kind == JobKind::Pdf => {
                // Best-effort look at what the page showed when the render
                // died; failures here are logged and ignored.
                match self.capture_diagnostic(job, page_slot).await {
                    Some(path) => Err(e.with_detail(&format!("diagnostic screenshot: {path}"))),
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    async fn drive(
        &self,
        job: &Job,
        page_slot: &Arc<Mutex<Option<Page>>>,
        dedicated_slot: &Arc<Mutex<Option<DedicatedBrowser>>>,
    ) -> Result<AttemptOutcome, RenderError> {
        // A job with its own launch options gets a private browser; the
        // shared pool browser cannot be reconfigured per job.
        let page = if let Some(override_) = &job.options.browser.launch_options {
            let dedicated = browser_pool::launch_dedicated(&self.config, override_).await?;
            self.metrics.record_browser_launch();
            let page = dedicated.new_page().await?;
            *dedicated_slot.lock().await = Some(dedicated);
            page
        } else {
            self.pool.new_page().await?
        };
        *page_slot.lock().await = Some(page.clone());

        self.configure_page(&page, job).await?;

        self.set_progress(&job.key, 10).await;
        let nav_timeout = Duration::from_millis(
            job.options
                .browser
                .timeout_ms
                .unwrap_or(self.config.browser.default_timeout_ms),
        );
        self.load_source(&page, job, nav_timeout).await?;
        self.set_progress(&job.key, 40).await;

        let browser_options = &job.options.browser;
        if browser_options.disable_animations {
            self.inject_animation_kill_switch(&page).await?;
            sleep(Duration::from_millis(50)).await;
        }
        if let Some(selector) = &browser_options.wait_for_selector {
            self.wait_for_selector(&page, selector, nav_timeout).await?;
        }
        self.set_progress(&job.key, 50).await;
        if browser_options.wait_after_ms > 0 {
            sleep(Duration::from_millis(browser_options.wait_after_ms)).await;
        }
        self.set_progress(&job.key, 60).await;

        // Cancellation checkpoint: the last status read before capture.
        match self.store.get(&job.key).await {
            Some(current) if current.status == JobStatus::Cancelled => {
                return Ok(AttemptOutcome::Cancelled)
            }
            Some(_) => {}
            None => return Ok(AttemptOutcome::Cancelled),
        }

        let bytes = self.renderer.capture(&page, &job.options).await?;
        self.set_progress(&job.key, 70).await;

        let now = self.clock.now().with_timezone(&Local);
        let dir = self
            .config
            .storage
            .output_dir
            .join(naming::date_folder(now));
        tokio::fs::create_dir_all(&dir).await?;
        let file_path = dir.join(naming::filename(
            &job.key,
            self.renderer.extension(&job.options),
            now,
        ));
        tokio::fs::write(&file_path, &bytes).await?;
        self.set_progress(&job.key, 100).await;

        let path_string = file_path.to_string_lossy().into_owned();
        self.store
            .update(&job.key, |j| {
                j.status = JobStatus::Completed;
                j.progress = 100;
                j.file_path = Some(path_string.clone());
                j.error = None;
            })
            .await;

        Ok(AttemptOutcome::Completed)
    }

    async fn configure_page(&self, page: &Page, job: &Job) -> Result<(), RenderError> {
        let options = &job.options.browser;
        let viewport = options
            .viewport
            .unwrap_or(self.config.browser.default_viewport);
        // `css` scale pins the capture to CSS pixels; `device` defers to the
        // browser's own scale factor.
        let device_scale_factor = match job.options.screenshot.scale {
            ScaleMode::Css => 1.0,
            ScaleMode::Device => 0.0,
        };

        let metrics_params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(device_scale_factor)
            .mobile(false)
            .build()
            .map_err(RenderError::PageError)?;
        page.execute(metrics_params)
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))?;

        if let Some(user_agent) = &options.user_agent {
            page.set_user_agent(user_agent.as_str())
                .await
                .map_err(|e| RenderError::PageError(e.to_string()))?;
        }

        if !options.extra_headers.is_empty() {
            let headers = Headers::new(serde_json::to_value(&options.extra_headers)?);
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(|e| RenderError::PageError(e.to_string()))?;
        }

        let mut features = vec![MediaFeature {
            name: "prefers-color-scheme".to_string(),
            value: options.color_scheme.as_media_value().to_string(),
        }];
        if options.disable_animations {
            features.push(MediaFeature {
                name: "prefers-reduced-motion".to_string(),
                value: "reduce".to_string(),
            });
        }
        let media_params = SetEmulatedMediaParams::builder().features(features).build();
        page.execute(media_params)
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))?;

        Ok(())
    }

    /// Load the source and wait out the network-idle condition, bounded by
    /// the per-job navigation timeout.
    async fn load_source(
        &self,
        page: &Page,
        job: &Job,
        nav_timeout: Duration,
    ) -> Result<(), RenderError> {
        let load = async {
            match job.source_kind {
                SourceKind::RemoteUrl => {
                    page.goto(job.source.as_str())
                        .await
                        .map_err(|e| RenderError::NavigationFailed(e.to_string()))?;
                    page.wait_for_navigation()
                        .await
                        .map_err(|e| RenderError::NavigationFailed(e.to_string()))?;
                }
                SourceKind::InlineHtml | SourceKind::UploadedHtml => {
                    page.set_content(job.source.as_str())
                        .await
                        .map_err(|e| RenderError::PageError(e.to_string()))?;
                    // The document is already replaced at this point; give
                    // subresources a bounded window to go idle. Absent a
                    // navigation event this would otherwise never resolve.
                    let _ = timeout(SET_CONTENT_SETTLE, page.wait_for_navigation()).await;
                }
            }
            Ok::<(), RenderError>(())
        };

        timeout(nav_timeout, load).await.map_err(|_| {
            RenderError::NavigationFailed(format!(
                "page load exceeded {} ms",
                nav_timeout.as_millis()
            ))
        })?
    }

    async fn inject_animation_kill_switch(&self, page: &Page) -> Result<(), RenderError> {
        let script = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {css:?}; \
             document.head.appendChild(style); }})()",
            css = DISABLE_ANIMATIONS_CSS
        );
        page.evaluate(script)
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        page: &Page,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), RenderError> {
        let selector_literal = serde_json::to_string(selector)?;
        let probe = format!(
            "(() => {{ const el = document.querySelector({selector_literal}); \
             if (!el) return false; \
             const style = window.getComputedStyle(el); \
             return style.display !== 'none' && style.visibility !== 'hidden'; }})()"
        );

        let started = Instant::now();
        loop {
            let visible = page
                .evaluate(probe.clone())
                .await
                .ok()
                .and_then(|result| result.into_value::<bool>().ok())
                .unwrap_or(false);
            if visible {
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(RenderError::PageError(format!(
                    "selector '{selector}' did not become visible within {} ms",
                    deadline.as_millis()
                )));
            }
            sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn capture_diagnostic(
        &self,
        job: &Job,
        page_slot: &Arc<Mutex<Option<Page>>>,
    ) -> Option<String> {
        let page = page_slot.lock().await.as_ref().cloned()?;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let bytes = match page.screenshot(params).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Diagnostic screenshot for '{}' failed: {e}", job.key);
                return None;
            }
        };

        let now = self.clock.now().with_timezone(&Local);
        let dir: PathBuf = self
            .config
            .storage
            .output_dir
            .join(naming::date_folder(now));
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            debug!("Could not create diagnostic directory: {e}");
            return None;
        }
        let path = dir.join(naming::error_screenshot_filename(&job.key, now));
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                debug!("Could not write diagnostic screenshot: {e}");
                None
            }
        }
    }

    async fn set_progress(&self, key: &str, progress: u8) {
        self.store
            .update(key, |job| job.progress = progress)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{RenderOptions, SystemClock};
    use crate::renderer::PdfRenderer;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn dispatched_cancelled_job_is_skipped_silently() {
        let dir = TempDir::new().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = JobStore::open(dir.path().join("jobs.json"), clock.clone()).await;
        let config = Config::default();

        let mut job = Job::new(
            "doomed".into(),
            JobKind::Pdf,
            SourceKind::InlineHtml,
            "<p>x</p>".into(),
            RenderOptions::default(),
            Utc::now(),
        );
        job.status = JobStatus::Cancelled;
        store.put(job).await;

        let (scheduler, _unused_rx) = Scheduler::new(store.clone(), 1);
        let (tx, rx) = mpsc::channel(1);
        let handles = spawn_workers(
            1,
            store.clone(),
            scheduler,
            BrowserPool::new(config.clone(), "pdf"),
            Arc::new(PdfRenderer::new(config.pdf.clone())),
            config,
            clock,
            Arc::new(RenderMetrics::new()),
            rx,
        );

        tx.send("doomed".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The reservation failed, so no browser was touched and the status
        // is untouched.
        assert_eq!(
            store.get("doomed").await.unwrap().status,
            JobStatus::Cancelled
        );
        for handle in handles {
            handle.abort();
        }
    }
}
