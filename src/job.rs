//! Job model shared by the store, scheduler, and workers.
//!
//! Jobs are identified by a caller-chosen requested key and move through
//! `QUEUED -> PROCESSING -> COMPLETED | FAILED | CANCELLED`. The serde
//! representation doubles as the on-disk snapshot schema, so everything here
//! deserializes leniently (`#[serde(default)]`, unknown fields ignored).

use crate::error::RenderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default queue priority when the caller does not supply one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Maximum accepted length of a requested key.
pub const MAX_KEY_LENGTH: usize = 255;

/// What the job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Pdf,
    Screenshot,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Pdf => "pdf",
            JobKind::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the `source` payload should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    InlineHtml,
    RemoteUrl,
    UploadedHtml,
}

impl SourceKind {
    pub fn is_html(&self) -> bool {
        matches!(self, SourceKind::InlineHtml | SourceKind::UploadedHtml)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorScheme {
    Light,
    Dark,
    #[default]
    NoPreference,
}

impl ColorScheme {
    pub fn as_media_value(&self) -> &'static str {
        match self {
            ColorScheme::Light => "light",
            ColorScheme::Dark => "dark",
            ColorScheme::NoPreference => "no-preference",
        }
    }
}

/// Per-job browser launch override. A job carrying one of these gets its own
/// dedicated browser instead of the shared pool instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchOverride {
    pub headless: Option<bool>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserOptions {
    /// Navigation timeout in milliseconds, capped at 120 000.
    pub timeout_ms: Option<u64>,
    pub viewport: Option<ViewportSize>,
    pub user_agent: Option<String>,
    pub extra_headers: HashMap<String, String>,
    pub wait_for_selector: Option<String>,
    /// Additional wait after load, in milliseconds, capped at 60 000.
    pub wait_after_ms: u64,
    pub disable_animations: bool,
    pub color_scheme: ColorScheme,
    pub launch_options: Option<LaunchOverride>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperFormat {
    #[default]
    A4,
    A3,
    A5,
    Letter,
    Legal,
}

impl PaperFormat {
    /// Paper size as (width, height) in inches, portrait orientation.
    pub fn size_inches(&self) -> (f64, f64) {
        match self {
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::A3 => (11.69, 16.54),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
        }
    }
}

/// A paper dimension: either a bare number of CSS pixels or a string with an
/// explicit `px`, `in`, `cm`, or `mm` unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PdfLength {
    Px(f64),
    Unit(String),
}

impl PdfLength {
    /// Convert to inches, the unit the print call expects. 96 CSS px = 1 in.
    pub fn to_inches(&self) -> Result<f64, RenderError> {
        let (value, unit) = match self {
            PdfLength::Px(px) => (*px, "px"),
            PdfLength::Unit(s) => {
                let s = s.trim();
                let split = s
                    .find(|c: char| c.is_ascii_alphabetic())
                    .unwrap_or(s.len());
                let value: f64 = s[..split].trim().parse().map_err(|_| {
                    RenderError::InvalidInput(format!("invalid length '{s}'"))
                })?;
                (value, s[split..].trim())
            }
        };
        let inches = match unit {
            "px" | "" => value / 96.0,
            "in" => value,
            "cm" => value / 2.54,
            "mm" => value / 25.4,
            other => {
                return Err(RenderError::InvalidInput(format!(
                    "unsupported length unit '{other}'"
                )))
            }
        };
        if !inches.is_finite() || inches <= 0.0 {
            return Err(RenderError::InvalidInput(format!(
                "length must be positive, got {value}{unit}"
            )));
        }
        Ok(inches)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfMargin {
    pub top: Option<String>,
    pub right: Option<String>,
    pub bottom: Option<String>,
    pub left: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdfOptions {
    /// Named paper format. An explicit `width` or `height` overrides the
    /// matching side; a side left unset still comes from this format.
    pub format: Option<PaperFormat>,
    pub width: Option<PdfLength>,
    pub height: Option<PdfLength>,
    pub landscape: bool,
    pub margin: Option<PdfMargin>,
    pub print_background: Option<bool>,
    /// Print scale, 0 < scale <= 2.
    pub scale: Option<f64>,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub display_header_footer: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Png,
    Jpeg,
}

impl ImageType {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageType::Png => "png",
            ImageType::Jpeg => "jpeg",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Png => "image/png",
            ImageType::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    #[default]
    Css,
    Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenshotOptions {
    #[serde(rename = "type")]
    pub output_type: ImageType,
    /// JPEG quality 0..=100. Only honored when `type` is jpeg.
    pub quality: Option<u8>,
    pub full_page: bool,
    /// Clip rectangle. Wins over `full_page` when both are set.
    pub clip: Option<ClipRect>,
    /// Transparent background. PNG only.
    pub omit_background: bool,
    pub scale: ScaleMode,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            output_type: ImageType::Png,
            quality: None,
            full_page: true,
            clip: None,
            omit_background: false,
            scale: ScaleMode::Css,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub browser: BrowserOptions,
    pub pdf: PdfOptions,
    pub screenshot: ScreenshotOptions,
    /// Queue priority 1..=10, higher runs earlier. Defaults to 5.
    pub priority: Option<u8>,
}

impl RenderOptions {
    /// Bounds checks on caller-supplied values. Called once at admission so
    /// workers never see out-of-range options.
    pub fn validate(&self) -> Result<(), RenderError> {
        if let Some(timeout) = self.browser.timeout_ms {
            if timeout == 0 || timeout > 120_000 {
                return Err(RenderError::InvalidInput(format!(
                    "browser timeout must be in 1..=120000 ms, got {timeout}"
                )));
            }
        }
        if self.browser.wait_after_ms > 60_000 {
            return Err(RenderError::InvalidInput(format!(
                "post-load wait must be at most 60000 ms, got {}",
                self.browser.wait_after_ms
            )));
        }
        if let Some(viewport) = &self.browser.viewport {
            if viewport.width == 0 || viewport.height == 0 {
                return Err(RenderError::InvalidInput(
                    "viewport dimensions must be non-zero".into(),
                ));
            }
        }
        if let Some(scale) = self.pdf.scale {
            if !(scale > 0.0 && scale <= 2.0) {
                return Err(RenderError::InvalidInput(format!(
                    "pdf scale must be in (0, 2], got {scale}"
                )));
            }
        }
        if let Some(width) = &self.pdf.width {
            width.to_inches()?;
        }
        if let Some(height) = &self.pdf.height {
            height.to_inches()?;
        }
        if let Some(quality) = self.screenshot.quality {
            if quality > 100 {
                return Err(RenderError::InvalidInput(format!(
                    "jpeg quality must be in 0..=100, got {quality}"
                )));
            }
        }
        if let Some(clip) = &self.screenshot.clip {
            if clip.width <= 0.0 || clip.height <= 0.0 {
                return Err(RenderError::InvalidInput(
                    "clip rectangle must have positive dimensions".into(),
                ));
            }
        }
        Ok(())
    }

    /// Effective priority, clamped into 1..=10.
    pub fn effective_priority(&self) -> u8 {
        self.priority.unwrap_or(DEFAULT_PRIORITY).clamp(1, 10)
    }
}

/// The central job record. Owned by the store for its entire lifetime;
/// scheduler and workers operate on it by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub key: String,
    pub kind: JobKind,
    pub source_kind: SourceKind,
    pub source: String,
    #[serde(default)]
    pub options: RenderOptions,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Job {
    pub fn new(
        key: String,
        kind: JobKind,
        source_kind: SourceKind,
        source: String,
        options: RenderOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let priority = options.effective_priority();
        Self {
            key,
            kind,
            source_kind,
            source,
            options,
            status: JobStatus::Queued,
            progress: 0,
            priority,
            created_at: now,
            updated_at: now,
            file_path: None,
            error: None,
        }
    }
}

/// Caller-facing projection of a job, with ISO-8601 timestamps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub key: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            key: job.key.clone(),
            status: job.status,
            progress: job.progress,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            file_path: job.file_path.clone(),
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Requested keys are caller-chosen identifiers that also end up in artifact
/// filenames, hence the tight character class.
pub fn validate_key(key: &str) -> Result<(), RenderError> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(RenderError::InvalidInput(format!(
            "key length must be in 1..={MAX_KEY_LENGTH}"
        )));
    }
    if let Some(bad) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(RenderError::InvalidInput(format!(
            "key may only contain ASCII letters, digits, '-' and '_' (found {bad:?})"
        )));
    }
    Ok(())
}

/// Time source. Injected so recovery and ordering behavior is testable with
/// a pinned clock.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
