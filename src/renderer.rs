//! The renderer capability: the verb that turns a loaded page into bytes.
//!
//! PDF and screenshot rendering share the whole pipeline up to the capture
//! call; this trait is the only point where they differ, so the scheduler,
//! store, and worker are generic over it.

use crate::config::PdfSettings;
use crate::error::RenderError;
use crate::job::{ImageType, JobKind, PdfLength, PdfOptions, RenderOptions};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, PrintToPdfParams, Viewport as ClipViewport,
};
use chromiumoxide::page::{Page, ScreenshotParams};

#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    fn kind(&self) -> JobKind;

    /// Artifact file extension for a job with these options.
    fn extension(&self, options: &RenderOptions) -> &'static str;

    fn mime(&self, options: &RenderOptions) -> &'static str;

    /// Produce the artifact bytes from a fully loaded page.
    async fn capture(&self, page: &Page, options: &RenderOptions) -> Result<Vec<u8>, RenderError>;
}

pub struct PdfRenderer {
    defaults: PdfSettings,
}

impl PdfRenderer {
    pub fn new(defaults: PdfSettings) -> Self {
        Self { defaults }
    }
}

#[async_trait]
impl Renderer for PdfRenderer {
    fn kind(&self) -> JobKind {
        JobKind::Pdf
    }

    fn extension(&self, _options: &RenderOptions) -> &'static str {
        "pdf"
    }

    fn mime(&self, _options: &RenderOptions) -> &'static str {
        "application/pdf"
    }

    async fn capture(&self, page: &Page, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        let params = build_pdf_params(&options.pdf, &self.defaults)?;
        page.pdf(params)
            .await
            .map_err(|e| RenderError::CaptureFailed(e.to_string()))
    }
}

/// Map the caller's PDF options onto the print call. Explicit width/height
/// win over the named paper format; a missing side falls back to the
/// format's side.
fn build_pdf_params(
    options: &PdfOptions,
    defaults: &PdfSettings,
) -> Result<PrintToPdfParams, RenderError> {
    let format = options.format.unwrap_or(defaults.default_format);
    let (format_width, format_height) = format.size_inches();

    let paper_width = match &options.width {
        Some(width) => width.to_inches()?,
        None => format_width,
    };
    let paper_height = match &options.height {
        Some(height) => height.to_inches()?,
        None => format_height,
    };

    let margin = |side: Option<&String>, default: &str| -> Result<f64, RenderError> {
        let raw = side.map(String::as_str).unwrap_or(default);
        PdfLength::Unit(raw.to_string()).to_inches()
    };
    let sides = options.margin.clone().unwrap_or_default();

    let mut builder = PrintToPdfParams::builder()
        .landscape(options.landscape)
        .print_background(
            options
                .print_background
                .unwrap_or(defaults.print_background),
        )
        .display_header_footer(options.display_header_footer)
        .paper_width(paper_width)
        .paper_height(paper_height)
        .margin_top(margin(sides.top.as_ref(), &defaults.default_margin.top)?)
        .margin_right(margin(sides.right.as_ref(), &defaults.default_margin.right)?)
        .margin_bottom(margin(sides.bottom.as_ref(), &defaults.default_margin.bottom)?)
        .margin_left(margin(sides.left.as_ref(), &defaults.default_margin.left)?);

    if let Some(scale) = options.scale {
        builder = builder.scale(scale);
    }
    if let Some(header) = &options.header_template {
        builder = builder.header_template(header.clone());
    }
    if let Some(footer) = &options.footer_template {
        builder = builder.footer_template(footer.clone());
    }

    Ok(builder.build())
}

pub struct ScreenshotRenderer;

impl ScreenshotRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScreenshotRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for ScreenshotRenderer {
    fn kind(&self) -> JobKind {
        JobKind::Screenshot
    }

    fn extension(&self, options: &RenderOptions) -> &'static str {
        options.screenshot.output_type.extension()
    }

    fn mime(&self, options: &RenderOptions) -> &'static str {
        options.screenshot.output_type.mime()
    }

    async fn capture(&self, page: &Page, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        let shot = &options.screenshot;

        let format = match shot.output_type {
            ImageType::Png => CaptureScreenshotFormat::Png,
            ImageType::Jpeg => CaptureScreenshotFormat::Jpeg,
        };
        let mut builder = ScreenshotParams::builder().format(format);

        if shot.output_type == ImageType::Jpeg {
            if let Some(quality) = shot.quality {
                builder = builder.quality(quality as i64);
            }
        }

        // A clip rectangle wins over full-page capture.
        if let Some(clip) = &shot.clip {
            builder = builder.clip(ClipViewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            });
        } else if shot.full_page {
            builder = builder.full_page(true);
        }

        if shot.output_type == ImageType::Png && shot.omit_background {
            builder = builder.omit_background(true);
        }

        page.screenshot(builder.build())
            .await
            .map_err(|e| RenderError::CaptureFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PaperFormat;

    fn defaults() -> PdfSettings {
        PdfSettings::default()
    }

    #[test]
    fn named_format_sets_paper_size() {
        let options = PdfOptions {
            format: Some(PaperFormat::Letter),
            ..PdfOptions::default()
        };
        let params = build_pdf_params(&options, &defaults()).unwrap();
        assert_eq!(params.paper_width, Some(8.5));
        assert_eq!(params.paper_height, Some(11.0));
    }

    #[test]
    fn explicit_dimensions_win_over_format() {
        let options = PdfOptions {
            format: Some(PaperFormat::A3),
            width: Some(PdfLength::Unit("2in".into())),
            height: Some(PdfLength::Px(96.0)),
            ..PdfOptions::default()
        };
        let params = build_pdf_params(&options, &defaults()).unwrap();
        assert_eq!(params.paper_width, Some(2.0));
        assert_eq!(params.paper_height, Some(1.0));
    }

    #[test]
    fn missing_side_falls_back_to_format() {
        let options = PdfOptions {
            width: Some(PdfLength::Unit("4in".into())),
            ..PdfOptions::default()
        };
        let params = build_pdf_params(&options, &defaults()).unwrap();
        assert_eq!(params.paper_width, Some(4.0));
        // Height comes from the default A4 format.
        assert_eq!(params.paper_height, Some(11.69));
    }

    #[test]
    fn margins_merge_job_over_config() {
        let options = PdfOptions {
            margin: Some(crate::job::PdfMargin {
                top: Some("1in".into()),
                ..Default::default()
            }),
            ..PdfOptions::default()
        };
        let params = build_pdf_params(&options, &defaults()).unwrap();
        assert_eq!(params.margin_top, Some(1.0));
        // The other sides keep the configured 10mm default.
        let ten_mm = 10.0 / 25.4;
        assert!((params.margin_left.unwrap() - ten_mm).abs() < 1e-9);
    }

    #[test]
    fn background_and_templates_pass_through() {
        let options = PdfOptions {
            print_background: Some(true),
            display_header_footer: true,
            header_template: Some("<span class='title'></span>".into()),
            footer_template: Some("<span class='pageNumber'></span>".into()),
            scale: Some(1.5),
            landscape: true,
            ..PdfOptions::default()
        };
        let params = build_pdf_params(&options, &defaults()).unwrap();
        assert_eq!(params.print_background, Some(true));
        assert_eq!(params.display_header_footer, Some(true));
        assert_eq!(params.landscape, Some(true));
        assert_eq!(params.scale, Some(1.5));
        assert!(params.header_template.is_some());
        assert!(params.footer_template.is_some());
    }

    #[test]
    fn invalid_margin_unit_is_rejected() {
        let options = PdfOptions {
            margin: Some(crate::job::PdfMargin {
                top: Some("10pt".into()),
                ..Default::default()
            }),
            ..PdfOptions::default()
        };
        assert!(build_pdf_params(&options, &defaults()).is_err());
    }

    #[test]
    fn extensions_follow_output_type() {
        let pdf = PdfRenderer::new(defaults());
        let shot = ScreenshotRenderer::new();
        let mut options = RenderOptions::default();

        assert_eq!(pdf.extension(&options), "pdf");
        assert_eq!(shot.extension(&options), "png");

        options.screenshot.output_type = ImageType::Jpeg;
        assert_eq!(shot.extension(&options), "jpeg");
        assert_eq!(shot.mime(&options), "image/jpeg");
    }
}
