//! Shared headless browser management.
//!
//! Each render kind owns one `BrowserPool` holding a single long-lived
//! Chromium instance, launched lazily on first demand. Concurrent first
//! uses coalesce behind the pool mutex. Jobs never share pages; the pool
//! hands out a fresh page per job and the worker closes it.
//!
//! Jobs carrying their own launch options bypass the pool entirely and get
//! a dedicated browser through [`launch_dedicated`], closed by the worker
//! at the end of the attempt.

use crate::config::{self, Config};
use crate::error::RenderError;
use crate::job::LaunchOverride;
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

struct SharedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

pub struct BrowserPool {
    config: Config,
    label: String,
    shared: Arc<Mutex<Option<SharedBrowser>>>,
}

impl Clone for BrowserPool {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            label: self.label.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl BrowserPool {
    /// `label` names the pool in logs and profile directories; one pool per
    /// render kind.
    pub fn new(config: Config, label: impl Into<String>) -> Self {
        Self {
            config,
            label: label.into(),
            shared: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a fresh page on the shared browser, launching it first if
    /// needed. A browser whose CDP handler has died is relaunched here.
    pub async fn new_page(&self) -> Result<Page, RenderError> {
        let mut shared = self.shared.lock().await;

        let needs_launch = match shared.as_ref() {
            Some(s) => s.handler_task.is_finished(),
            None => true,
        };

        if needs_launch {
            if let Some(old) = shared.take() {
                info!("Shared {} browser died, relaunching", self.label);
                old.handler_task.abort();
            }
            let profile_id = format!("{}-{}", self.label, Uuid::new_v4());
            let browser_config = config::pool_browser_config(&self.config, &profile_id)?;
            let (browser, handler_task) = launch(browser_config).await?;
            info!("Shared {} browser launched", self.label);
            *shared = Some(SharedBrowser {
                browser,
                handler_task,
            });
        }

        let Some(shared) = shared.as_ref() else {
            return Err(RenderError::BrowserLaunchFailed(
                "browser state empty after launch".into(),
            ));
        };
        shared
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))
    }

    pub async fn is_launched(&self) -> bool {
        self.shared.lock().await.is_some()
    }

    /// Tear the shared browser down. Called on shutdown; never by workers.
    pub async fn close(&self) {
        let mut shared = self.shared.lock().await;
        if let Some(mut s) = shared.take() {
            if let Err(e) = s.browser.close().await {
                debug!("Error closing shared {} browser: {e}", self.label);
            }
            s.handler_task.abort();
            info!("Shared {} browser closed", self.label);
        }
    }
}

/// A browser launched for a single job because it carried its own launch
/// options. Owned and closed by the worker that launched it.
pub struct DedicatedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl DedicatedBrowser {
    pub async fn new_page(&self) -> Result<Page, RenderError> {
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::PageError(e.to_string()))
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Error closing dedicated browser: {e}");
        }
        self.handler_task.abort();
    }
}

/// Launch a dedicated browser for one job.
pub async fn launch_dedicated(
    config: &Config,
    override_: &LaunchOverride,
) -> Result<DedicatedBrowser, RenderError> {
    let profile_id = format!("dedicated-{}", Uuid::new_v4());
    let browser_config = config::dedicated_browser_config(config, override_, &profile_id)?;
    let (browser, handler_task) = launch(browser_config).await?;
    debug!("Dedicated browser launched");
    Ok(DedicatedBrowser {
        browser,
        handler_task,
    })
}

/// Launch and start pumping the CDP event stream. The handler must be
/// polled continuously for the browser connection to make progress; the
/// spawned task ending is the signal that the browser is gone.
async fn launch(
    browser_config: chromiumoxide::browser::BrowserConfig,
) -> Result<(Browser, JoinHandle<()>), RenderError> {
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| RenderError::BrowserLaunchFailed(e.to_string()))?;

    let handler_task = tokio::spawn(async move {
        loop {
            match handler.next().await {
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("CDP handler error: {e}");
                    break;
                }
                None => {
                    debug!("CDP handler stream ended");
                    break;
                }
            }
        }
    });

    Ok((browser, handler_task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_before_first_use_is_a_noop() {
        let pool = BrowserPool::new(Config::default(), "pdf");
        assert!(!pool.is_launched().await);
        pool.close().await;
        assert!(!pool.is_launched().await);
    }
}
