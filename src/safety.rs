//! Source-safety seams: URL validation and HTML sanitization.
//!
//! Both are external collaborators of the core; the facade calls them as
//! pure checks before a job is admitted. The defaults here are deliberately
//! modest; deployments with stricter policies inject their own.

use crate::error::RenderError;
use url::Url;

pub trait UrlValidator: Send + Sync {
    /// Returns the normalized URL string, or an unsafe-source rejection.
    fn validate(&self, raw: &str) -> Result<String, RenderError>;
}

pub trait HtmlSanitizer: Send + Sync {
    /// Returns the sanitized document, or an unsafe-source rejection.
    fn sanitize(&self, html: &str) -> Result<String, RenderError>;
}

/// Accepts http/https URLs with a host. Everything else (file:, data:,
/// javascript:, relative paths) is rejected before it reaches a browser.
#[derive(Debug, Clone, Default)]
pub struct SchemeUrlValidator;

impl UrlValidator for SchemeUrlValidator {
    fn validate(&self, raw: &str) -> Result<String, RenderError> {
        let parsed = Url::parse(raw)
            .map_err(|e| RenderError::UnsafeSource(format!("invalid URL: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RenderError::UnsafeSource(format!(
                    "URL scheme '{other}' is not allowed"
                )))
            }
        }
        if parsed.host_str().is_none() {
            return Err(RenderError::UnsafeSource("URL has no host".into()));
        }
        Ok(parsed.to_string())
    }
}

/// Caps document size and strips NUL bytes; rejects empty documents.
#[derive(Debug, Clone)]
pub struct BasicHtmlSanitizer {
    pub max_bytes: usize,
}

impl Default for BasicHtmlSanitizer {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl HtmlSanitizer for BasicHtmlSanitizer {
    fn sanitize(&self, html: &str) -> Result<String, RenderError> {
        if html.trim().is_empty() {
            return Err(RenderError::UnsafeSource("HTML document is empty".into()));
        }
        if html.len() > self.max_bytes {
            return Err(RenderError::UnsafeSource(format!(
                "HTML document exceeds {} bytes",
                self.max_bytes
            )));
        }
        Ok(html.replace('\0', ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validator_accepts_http_and_https() {
        let validator = SchemeUrlValidator;
        assert!(validator.validate("https://example.com").is_ok());
        assert!(validator.validate("http://example.com/path?q=1").is_ok());
    }

    #[test]
    fn url_validator_rejects_other_schemes() {
        let validator = SchemeUrlValidator;
        assert!(validator.validate("file:///etc/passwd").is_err());
        assert!(validator.validate("javascript:alert(1)").is_err());
        assert!(validator.validate("ftp://example.com").is_err());
        assert!(validator.validate("not a url").is_err());
    }

    #[test]
    fn sanitizer_strips_nul_and_caps_size() {
        let sanitizer = BasicHtmlSanitizer { max_bytes: 16 };
        assert_eq!(sanitizer.sanitize("<p>a\0b</p>").unwrap(), "<p>ab</p>");
        assert!(sanitizer.sanitize("").is_err());
        assert!(sanitizer.sanitize("<p>waaaay too long</p>").is_err());
    }
}
