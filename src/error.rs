use crate::job::JobStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Source rejected as unsafe: {0}")]
    UnsafeSource(String),

    #[error("A job with key '{0}' already exists")]
    DuplicateKey(String),

    #[error("Queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("No job found for key '{0}'")]
    NotFound(String),

    #[error("Job '{key}' is not ready yet (status: {status})")]
    NotReady { key: String, status: JobStatus },

    #[error("Artifact for job '{0}' is missing on disk")]
    ArtifactMissing(String),

    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RenderError {
    /// Whether another render attempt could plausibly succeed. Admission
    /// errors and cancellation are final; everything the browser pipeline
    /// produces is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenderError::TimedOut(_)
                | RenderError::BrowserLaunchFailed(_)
                | RenderError::PageError(_)
                | RenderError::NavigationFailed(_)
                | RenderError::CaptureFailed(_)
                | RenderError::Io(_)
        )
    }
}

impl RenderError {
    /// Append context (such as a diagnostic artifact path) to the message
    /// while keeping the error kind, so retry classification is unaffected.
    pub fn with_detail(self, detail: &str) -> Self {
        use RenderError::*;
        match self {
            RenderFailed(m) => RenderFailed(format!("{m} ({detail})")),
            BrowserLaunchFailed(m) => BrowserLaunchFailed(format!("{m} ({detail})")),
            PageError(m) => PageError(format!("{m} ({detail})")),
            NavigationFailed(m) => NavigationFailed(format!("{m} ({detail})")),
            CaptureFailed(m) => CaptureFailed(format!("{m} ({detail})")),
            Io(m) => Io(format!("{m} ({detail})")),
            InvalidInput(m) => InvalidInput(format!("{m} ({detail})")),
            other => other,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_are_retryable() {
        assert!(RenderError::TimedOut(Duration::from_secs(1)).is_retryable());
        assert!(RenderError::PageError("net::ERR_FAILED".into()).is_retryable());
        assert!(RenderError::BrowserLaunchFailed("no chrome".into()).is_retryable());
        assert!(RenderError::CaptureFailed("target closed".into()).is_retryable());
    }

    #[test]
    fn admission_errors_are_final() {
        assert!(!RenderError::InvalidInput("bad key".into()).is_retryable());
        assert!(!RenderError::UnsafeSource("file: scheme".into()).is_retryable());
        assert!(!RenderError::DuplicateKey("x".into()).is_retryable());
        assert!(!RenderError::Cancelled.is_retryable());
    }
}
