//! Reading completed artifacts back for download.

use crate::error::RenderError;
use crate::job::JobStatus;
use crate::renderer::Renderer;
use crate::store::JobStore;
use std::path::Path;
use tokio::fs::File;

/// An open artifact ready for streaming, with a size hint for
/// Content-Length.
#[derive(Debug)]
pub struct ArtifactHandle {
    pub file: File,
    pub size: u64,
    pub filename: String,
    pub mime: &'static str,
}

/// Locate the artifact for `key` and open it.
///
/// Errors discriminate the caller-visible cases: unknown key, job not yet
/// `COMPLETED` (carrying the current status), and a completed job whose
/// file has since disappeared.
pub async fn open_artifact(
    store: &JobStore,
    renderer: &dyn Renderer,
    key: &str,
) -> Result<ArtifactHandle, RenderError> {
    let job = store
        .get(key)
        .await
        .ok_or_else(|| RenderError::NotFound(key.to_string()))?;

    if job.status != JobStatus::Completed {
        return Err(RenderError::NotReady {
            key: key.to_string(),
            status: job.status,
        });
    }

    let path = job
        .file_path
        .as_deref()
        .ok_or_else(|| RenderError::ArtifactMissing(key.to_string()))?;

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RenderError::ArtifactMissing(key.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();

    let filename = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{key}.{}", renderer.extension(&job.options)));

    Ok(ArtifactHandle {
        file,
        size,
        filename,
        mime: renderer.mime(&job.options),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Clock, Job, JobKind, RenderOptions, SourceKind, SystemClock};
    use crate::renderer::PdfRenderer;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> JobStore {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        JobStore::open(dir.path().join("jobs.json"), clock).await
    }

    fn renderer() -> PdfRenderer {
        PdfRenderer::new(Default::default())
    }

    fn job(key: &str, status: JobStatus, file_path: Option<String>) -> Job {
        let mut job = Job::new(
            key.to_string(),
            JobKind::Pdf,
            SourceKind::InlineHtml,
            "<p>x</p>".to_string(),
            RenderOptions::default(),
            Utc::now(),
        );
        job.status = status;
        job.file_path = file_path;
        job
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let err = open_artifact(&store, &renderer(), "nope").await.unwrap_err();
        assert!(matches!(err, RenderError::NotFound(_)));
    }

    #[tokio::test]
    async fn incomplete_job_reports_current_status() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.put(job("pending", JobStatus::Processing, None)).await;

        let err = open_artifact(&store, &renderer(), "pending")
            .await
            .unwrap_err();
        match err {
            RenderError::NotReady { status, .. } => assert_eq!(status, JobStatus::Processing),
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_artifact_missing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store
            .put(job(
                "gone",
                JobStatus::Completed,
                Some(dir.path().join("nothing.pdf").to_string_lossy().into_owned()),
            ))
            .await;

        let err = open_artifact(&store, &renderer(), "gone").await.unwrap_err();
        assert!(matches!(err, RenderError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn completed_job_opens_with_size_and_mime() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let path = dir.path().join("doc__12-00-00.pdf");
        tokio::fs::write(&path, b"%PDF-1.7 test").await.unwrap();
        store
            .put(job(
                "doc",
                JobStatus::Completed,
                Some(path.to_string_lossy().into_owned()),
            ))
            .await;

        let handle = open_artifact(&store, &renderer(), "doc").await.unwrap();
        assert_eq!(handle.size, 13);
        assert_eq!(handle.filename, "doc__12-00-00.pdf");
        assert_eq!(handle.mime, "application/pdf");
    }
}
