//! Configuration snapshot consumed by the render core.
//!
//! The snapshot is loaded once from a JSON file merged over defaults and
//! treated as immutable afterwards. Sections mirror the concerns they tune:
//! browser, pdf, queue, and storage.

use crate::error::RenderError;
use crate::job::{LaunchOverride, PaperFormat, ViewportSize};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub browser: BrowserSettings,
    pub pdf: PdfSettings,
    pub queue: QueueSettings,
    pub storage: StorageSettings,

    /// Path to a Chrome/Chromium executable. Auto-detected when absent.
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
    /// Concurrent render ceiling per kind (1..=10).
    pub max_concurrent: usize,

    /// Default navigation timeout in milliseconds (1000..=120000).
    pub default_timeout_ms: u64,

    pub default_viewport: ViewportSize,

    pub launch_options: LaunchSettings,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            default_timeout_ms: 30_000,
            default_viewport: ViewportSize::default(),
            launch_options: LaunchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchSettings {
    pub headless: bool,
    pub args: Vec<String>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfSettings {
    pub default_format: PaperFormat,
    pub default_margin: MarginSettings,
    pub print_background: bool,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            default_format: PaperFormat::A4,
            default_margin: MarginSettings::default(),
            print_background: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarginSettings {
    pub top: String,
    pub right: String,
    pub bottom: String,
    pub left: String,
}

impl Default for MarginSettings {
    fn default() -> Self {
        Self {
            top: "10mm".into(),
            right: "10mm".into(),
            bottom: "10mm".into(),
            left: "10mm".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Store capacity counting every record, terminal ones included (1..=1000).
    pub max_size: usize,

    /// Per-attempt deadline in milliseconds (5000..=300000).
    pub processing_timeout_ms: u64,

    /// Additional attempts after the first failure (0..=5).
    pub retry_attempts: u32,

    /// Sleep between attempts in milliseconds (100..=30000).
    pub retry_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 100,
            processing_timeout_ms: 60_000,
            retry_attempts: 1,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Root under which date-partitioned artifact folders are created.
    pub output_dir: PathBuf,

    /// Directory holding the per-kind job snapshot files.
    pub state_dir: PathBuf,

    /// Age after which terminal jobs are eligible for cleanup (1..=720).
    pub cleanup_after_hours: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            state_dir: PathBuf::from("./state"),
            cleanup_after_hours: 72,
        }
    }
}

impl Config {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.queue.processing_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.queue.retry_delay_ms)
    }

    pub fn default_navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.default_timeout_ms)
    }

    pub fn cleanup_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.storage.cleanup_after_hours as i64)
    }

    /// Range checks over every tunable. Rejecting here keeps the rest of the
    /// core free of defensive bounds handling.
    pub fn validate(&self) -> Result<(), RenderError> {
        fn check<T: PartialOrd + std::fmt::Display>(
            name: &str,
            value: T,
            min: T,
            max: T,
        ) -> Result<(), RenderError> {
            if value < min || value > max {
                return Err(RenderError::InvalidInput(format!(
                    "{name} must be in {min}..={max}, got {value}"
                )));
            }
            Ok(())
        }

        check("browser.maxConcurrent", self.browser.max_concurrent, 1, 10)?;
        check(
            "browser.defaultTimeoutMs",
            self.browser.default_timeout_ms,
            1_000,
            120_000,
        )?;
        if self.browser.default_viewport.width == 0 || self.browser.default_viewport.height == 0 {
            return Err(RenderError::InvalidInput(
                "browser.defaultViewport dimensions must be non-zero".into(),
            ));
        }
        check("queue.maxSize", self.queue.max_size, 1, 1_000)?;
        check(
            "queue.processingTimeoutMs",
            self.queue.processing_timeout_ms,
            5_000,
            300_000,
        )?;
        check("queue.retryAttempts", self.queue.retry_attempts, 0, 5)?;
        check("queue.retryDelayMs", self.queue.retry_delay_ms, 100, 30_000)?;
        check(
            "storage.cleanupAfterHours",
            self.storage.cleanup_after_hours,
            1,
            720,
        )?;
        Ok(())
    }
}

/// Chrome command-line arguments for a pool or dedicated launch.
///
/// `profile_id` isolates the user-data directory so concurrent browsers never
/// trip over Chrome's profile singleton.
pub fn chrome_args(config: &Config, profile_id: &str) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        format!(
            "--window-size={},{}",
            config.browser.default_viewport.width, config.browser.default_viewport.height
        ),
        format!(
            "--user-data-dir={}",
            std::env::temp_dir()
                .join(format!("render-service-{}-{profile_id}", std::process::id()))
                .display()
        ),
    ];

    args.extend(config.browser.launch_options.args.iter().cloned());
    args
}

/// Browser configuration for the shared per-kind pool browser.
pub fn pool_browser_config(
    config: &Config,
    profile_id: &str,
) -> Result<chromiumoxide::browser::BrowserConfig, RenderError> {
    build_browser_config(
        config,
        profile_id,
        config.browser.launch_options.headless,
        &[],
    )
}

/// Browser configuration for a job that carries its own launch override.
/// An unset `headless` inherits the snapshot's flag.
pub fn dedicated_browser_config(
    config: &Config,
    override_: &LaunchOverride,
    profile_id: &str,
) -> Result<chromiumoxide::browser::BrowserConfig, RenderError> {
    build_browser_config(
        config,
        profile_id,
        override_
            .headless
            .unwrap_or(config.browser.launch_options.headless),
        &override_.args,
    )
}

fn build_browser_config(
    config: &Config,
    profile_id: &str,
    headless: bool,
    extra_args: &[String],
) -> Result<chromiumoxide::browser::BrowserConfig, RenderError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut args = chrome_args(config, profile_id);
    args.extend(extra_args.iter().cloned());

    let mut builder = BrowserConfig::builder()
        .window_size(
            config.browser.default_viewport.width,
            config.browser.default_viewport.height,
        )
        .args(args);

    if !headless {
        builder = builder.with_head();
    }
    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(RenderError::BrowserLaunchFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_tunables_are_rejected() {
        let mut config = Config::default();
        config.browser.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.browser.max_concurrent = 11;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.queue.processing_timeout_ms = 1_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.queue.retry_attempts = 6;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.cleanup_after_hours = 721;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_merges_over_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"queue": {"maxSize": 50}, "browser": {"maxConcurrent": 2}}"#)
                .unwrap();
        assert_eq!(config.queue.max_size, 50);
        assert_eq!(config.browser.max_concurrent, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.queue.retry_delay_ms, 1_000);
        assert_eq!(config.browser.default_viewport.width, 1280);
    }

    #[test]
    fn chrome_args_include_window_size_and_profile() {
        let config = Config::default();
        let args = chrome_args(&config, "test");
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--window-size=1280,720".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
    }

    #[test]
    fn launch_override_args_are_appended() {
        let mut config = Config::default();
        config.browser.launch_options.args = vec!["--lang=de".into()];
        let args = chrome_args(&config, "x");
        assert!(args.contains(&"--lang=de".to_string()));
    }
}
