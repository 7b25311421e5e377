use crate::{
    Config, ImageType, JobKind, JobStatus, PaperFormat, RenderOptions, RenderService, SourceKind,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::info;

#[derive(Parser)]
#[command(name = "render-service")]
#[command(about = "Render HTML or web pages to PDF documents and screenshots")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Maximum concurrent renders per kind")]
    pub max_concurrent: Option<usize>,

    #[arg(long, help = "Per-attempt processing timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Artifact output directory")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, help = "Job snapshot state directory")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a PDF and wait for the result
    Pdf {
        #[arg(short, long, help = "Requested key identifying the job")]
        key: String,

        #[arg(long, help = "Remote URL to render", conflicts_with_all = ["html", "html_file"])]
        url: Option<String>,

        #[arg(long, help = "Inline HTML to render", conflicts_with = "html_file")]
        html: Option<String>,

        #[arg(long, help = "HTML file to render")]
        html_file: Option<PathBuf>,

        #[arg(short, long, help = "Copy the finished artifact to this path")]
        output: Option<PathBuf>,

        #[arg(long, help = "Paper format (A4, A3, A5, Letter, Legal)")]
        format: Option<String>,

        #[arg(long, help = "Landscape orientation")]
        landscape: bool,

        #[arg(long, help = "Print background graphics")]
        print_background: bool,

        #[arg(long, help = "Print scale, 0 < scale <= 2")]
        scale: Option<f64>,

        #[arg(long, help = "Queue priority 1..=10 (higher runs earlier)")]
        priority: Option<u8>,

        #[arg(long, help = "Wait after load in milliseconds")]
        wait: Option<u64>,

        #[arg(long, help = "CSS selector to wait for before capture")]
        selector: Option<String>,

        #[arg(long, help = "Replace an existing job and artifact under this key")]
        re_create: bool,
    },

    /// Render a screenshot and wait for the result
    Screenshot {
        #[arg(short, long, help = "Requested key identifying the job")]
        key: String,

        #[arg(long, help = "Remote URL to render", conflicts_with_all = ["html", "html_file"])]
        url: Option<String>,

        #[arg(long, help = "Inline HTML to render", conflicts_with = "html_file")]
        html: Option<String>,

        #[arg(long, help = "HTML file to render")]
        html_file: Option<PathBuf>,

        #[arg(short, long, help = "Copy the finished artifact to this path")]
        output: Option<PathBuf>,

        #[arg(long, help = "Image type (png, jpeg)")]
        format: Option<String>,

        #[arg(long, help = "JPEG quality 0..=100")]
        quality: Option<u8>,

        #[arg(long, help = "Capture only the viewport instead of the full page")]
        viewport_only: bool,

        #[arg(long, help = "Viewport width")]
        width: Option<u32>,

        #[arg(long, help = "Viewport height")]
        height: Option<u32>,

        #[arg(long, help = "Queue priority 1..=10 (higher runs earlier)")]
        priority: Option<u8>,

        #[arg(long, help = "Wait after load in milliseconds")]
        wait: Option<u64>,

        #[arg(long, help = "CSS selector to wait for before capture")]
        selector: Option<String>,

        #[arg(long, help = "Replace an existing job and artifact under this key")]
        re_create: bool,
    },

    /// Show the status of a job
    Status {
        #[arg(long, help = "Job kind (pdf, screenshot)")]
        kind: String,

        #[arg(short, long, help = "Requested key")]
        key: String,
    },

    /// Show queue statistics
    Stats {
        #[arg(long, help = "Job kind (pdf, screenshot)")]
        kind: String,
    },

    /// Delete old terminal jobs from both stores
    Cleanup {
        #[arg(long, help = "Age threshold in hours (defaults to the configured value)")]
        older_than_hours: Option<u64>,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Config,
    pub service: Arc<RenderService>,
}

impl CliRunner {
    pub async fn new(config: Config, _args: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let service = Arc::new(RenderService::new(config.clone()).await?);
        Ok(Self { config, service })
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Pdf {
                key,
                url,
                html,
                html_file,
                output,
                format,
                landscape,
                print_background,
                scale,
                priority,
                wait,
                selector,
                re_create,
            } => {
                let (source_kind, source) = resolve_source(url, html, html_file).await?;
                let mut options = RenderOptions {
                    priority,
                    ..RenderOptions::default()
                };
                options.pdf.format = format.as_deref().map(parse_paper_format).transpose()?;
                options.pdf.landscape = landscape;
                if print_background {
                    options.pdf.print_background = Some(true);
                }
                options.pdf.scale = scale;
                options.browser.wait_after_ms = wait.unwrap_or(0);
                options.browser.wait_for_selector = selector;

                self.render_and_wait(JobKind::Pdf, &key, source_kind, source, options, re_create, output)
                    .await
            }
            Commands::Screenshot {
                key,
                url,
                html,
                html_file,
                output,
                format,
                quality,
                viewport_only,
                width,
                height,
                priority,
                wait,
                selector,
                re_create,
            } => {
                let (source_kind, source) = resolve_source(url, html, html_file).await?;
                let mut options = RenderOptions {
                    priority,
                    ..RenderOptions::default()
                };
                options.screenshot.output_type =
                    format.as_deref().map(parse_image_type).transpose()?.unwrap_or_default();
                options.screenshot.quality = quality;
                options.screenshot.full_page = !viewport_only;
                if width.is_some() || height.is_some() {
                    let default_viewport = self.config.browser.default_viewport;
                    options.browser.viewport = Some(crate::ViewportSize {
                        width: width.unwrap_or(default_viewport.width),
                        height: height.unwrap_or(default_viewport.height),
                    });
                }
                options.browser.wait_after_ms = wait.unwrap_or(0);
                options.browser.wait_for_selector = selector;

                self.render_and_wait(
                    JobKind::Screenshot,
                    &key,
                    source_kind,
                    source,
                    options,
                    re_create,
                    output,
                )
                .await
            }
            Commands::Status { kind, key } => self.show_status(&kind, &key).await,
            Commands::Stats { kind } => self.show_stats(&kind).await,
            Commands::Cleanup { older_than_hours } => self.run_cleanup(older_than_hours).await,
            Commands::Validate { config } => validate_config_file(config).await,
        }
    }

    /// Submit and poll until the job reaches a terminal status.
    #[allow(clippy::too_many_arguments)]
    async fn render_and_wait(
        &self,
        kind: JobKind,
        key: &str,
        source_kind: SourceKind,
        source: String,
        options: RenderOptions,
        re_create: bool,
        output: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        info!("Submitting {kind} job '{key}'");
        let job = match kind {
            JobKind::Pdf => {
                self.service
                    .submit_pdf(key, source_kind, source, options, re_create)
                    .await?
            }
            JobKind::Screenshot => {
                self.service
                    .submit_screenshot(key, source_kind, source, options, re_create)
                    .await?
            }
        };

        if job.status == JobStatus::Completed {
            println!("Existing result for '{key}': {}", job.file_path.as_deref().unwrap_or("?"));
            return self.copy_artifact(kind, key, output).await;
        }

        let mut last_progress = 0;
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let Some(view) = self.service.get_status(kind, key).await else {
                return Err(format!("job '{key}' disappeared while waiting").into());
            };
            if view.progress != last_progress {
                info!("Job '{key}': {} ({}%)", view.status, view.progress);
                last_progress = view.progress;
            }
            match view.status {
                JobStatus::Completed => {
                    println!(
                        "Completed '{key}': {}",
                        view.file_path.as_deref().unwrap_or("?")
                    );
                    return self.copy_artifact(kind, key, output).await;
                }
                JobStatus::Failed => {
                    return Err(format!(
                        "job '{key}' failed: {}",
                        view.error.as_deref().unwrap_or("unknown error")
                    )
                    .into());
                }
                JobStatus::Cancelled => {
                    println!("Job '{key}' was cancelled");
                    return Ok(());
                }
                JobStatus::Queued | JobStatus::Processing => {}
            }
        }
    }

    async fn copy_artifact(
        &self,
        kind: JobKind,
        key: &str,
        output: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let Some(output) = output else {
            return Ok(());
        };
        let mut handle = self.service.open_artifact(kind, key).await?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&output).await?;
        tokio::io::copy(&mut handle.file, &mut file).await?;
        println!("Copied {} bytes to {}", handle.size, output.display());
        Ok(())
    }

    async fn show_status(&self, kind: &str, key: &str) -> Result<(), Box<dyn std::error::Error>> {
        let kind = parse_kind(kind)?;
        match self.service.get_status(kind, key).await {
            Some(view) => {
                println!("Key:       {}", view.key);
                println!("Status:    {}", view.status);
                println!("Progress:  {}%", view.progress);
                println!("Created:   {}", view.created_at);
                println!("Updated:   {}", view.updated_at);
                if let Some(path) = &view.file_path {
                    println!("Artifact:  {path}");
                }
                if let Some(error) = &view.error {
                    println!("Error:     {error}");
                }
            }
            None => println!("No job found for key '{key}'"),
        }
        Ok(())
    }

    async fn show_stats(&self, kind: &str) -> Result<(), Box<dyn std::error::Error>> {
        let stats = self.service.queue_stats(parse_kind(kind)?).await;
        println!("Total:      {}", stats.total);
        println!("Queued:     {}", stats.queued);
        println!("Processing: {}", stats.processing);
        println!("Completed:  {}", stats.completed);
        println!("Failed:     {}", stats.failed);
        println!("Cancelled:  {}", stats.cancelled);
        Ok(())
    }

    async fn run_cleanup(
        &self,
        older_than_hours: Option<u64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let age = chrono::Duration::hours(
            older_than_hours.unwrap_or(self.config.storage.cleanup_after_hours) as i64,
        );
        let (pdf, screenshot) = self.service.cleanup_older_than(age).await;
        println!("Deleted {pdf} pdf job(s) and {screenshot} screenshot job(s)");
        Ok(())
    }
}

async fn resolve_source(
    url: Option<String>,
    html: Option<String>,
    html_file: Option<PathBuf>,
) -> Result<(SourceKind, String), Box<dyn std::error::Error>> {
    match (url, html, html_file) {
        (Some(url), None, None) => Ok((SourceKind::RemoteUrl, url)),
        (None, Some(html), None) => Ok((SourceKind::InlineHtml, html)),
        (None, None, Some(path)) => {
            let html = fs::read_to_string(&path).await?;
            Ok((SourceKind::UploadedHtml, html))
        }
        _ => Err("exactly one of --url, --html, or --html-file is required".into()),
    }
}

fn parse_kind(raw: &str) -> Result<JobKind, Box<dyn std::error::Error>> {
    match raw.to_ascii_lowercase().as_str() {
        "pdf" => Ok(JobKind::Pdf),
        "screenshot" => Ok(JobKind::Screenshot),
        other => Err(format!("unknown kind '{other}' (expected pdf or screenshot)").into()),
    }
}

fn parse_paper_format(raw: &str) -> Result<PaperFormat, Box<dyn std::error::Error>> {
    match raw.to_ascii_lowercase().as_str() {
        "a4" => Ok(PaperFormat::A4),
        "a3" => Ok(PaperFormat::A3),
        "a5" => Ok(PaperFormat::A5),
        "letter" => Ok(PaperFormat::Letter),
        "legal" => Ok(PaperFormat::Legal),
        other => Err(format!("unknown paper format '{other}'").into()),
    }
}

fn parse_image_type(raw: &str) -> Result<ImageType, Box<dyn std::error::Error>> {
    match raw.to_ascii_lowercase().as_str() {
        "png" => Ok(ImageType::Png),
        "jpeg" | "jpg" => Ok(ImageType::Jpeg),
        other => Err(format!("unknown image type '{other}'").into()),
    }
}

async fn validate_config_file(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(&path).await?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Max concurrent:     {}", config.browser.max_concurrent);
    println!("  Processing timeout: {} ms", config.queue.processing_timeout_ms);
    println!("  Queue cap:          {}", config.queue.max_size);
    println!("  Retry attempts:     {}", config.queue.retry_attempts);
    println!("  Output dir:         {}", config.storage.output_dir.display());
    Ok(())
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_format_parsing() {
        assert_eq!(parse_kind("pdf").unwrap(), JobKind::Pdf);
        assert_eq!(parse_kind("SCREENSHOT").unwrap(), JobKind::Screenshot);
        assert!(parse_kind("gif").is_err());

        assert_eq!(parse_paper_format("letter").unwrap(), PaperFormat::Letter);
        assert!(parse_paper_format("b5").is_err());

        assert_eq!(parse_image_type("jpg").unwrap(), ImageType::Jpeg);
        assert!(parse_image_type("webp").is_err());
    }

    #[tokio::test]
    async fn source_resolution_requires_exactly_one() {
        assert!(resolve_source(None, None, None).await.is_err());
        assert!(
            resolve_source(Some("https://example.com".into()), Some("<p>x</p>".into()), None)
                .await
                .is_err()
        );

        let (kind, source) = resolve_source(None, Some("<p>x</p>".into()), None)
            .await
            .unwrap();
        assert_eq!(kind, SourceKind::InlineHtml);
        assert_eq!(source, "<p>x</p>");
    }
}
