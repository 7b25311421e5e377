use metrics::{Counter, Gauge, Histogram};
use std::time::Duration;

/// Counters and gauges recorded by the render pipeline. Handles are no-op
/// until a recorder is installed by the embedding process.
pub struct RenderMetrics {
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_cancelled: Counter,
    pub render_duration: Histogram,
    pub retries: Counter,
    pub queue_size: Gauge,
    pub browser_launches: Counter,
}

impl RenderMetrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: Counter::noop(),
            jobs_failed: Counter::noop(),
            jobs_cancelled: Counter::noop(),
            render_duration: Histogram::noop(),
            retries: Counter::noop(),
            queue_size: Gauge::noop(),
            browser_launches: Counter::noop(),
        }
    }

    pub fn record_completed(&self, duration: Duration) {
        self.jobs_completed.increment(1);
        self.render_duration.record(duration.as_secs_f64());
    }

    pub fn record_failed(&self) {
        self.jobs_failed.increment(1);
    }

    pub fn record_cancelled(&self) {
        self.jobs_cancelled.increment(1);
    }

    pub fn record_retry(&self) {
        self.retries.increment(1);
    }

    pub fn record_browser_launch(&self) {
        self.browser_launches.increment(1);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.set(size as f64);
    }
}

impl Default for RenderMetrics {
    fn default() -> Self {
        Self::new()
    }
}
