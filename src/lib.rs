//! # Render Service
//!
//! A headless-Chromium render service: turn HTML documents or remote web
//! pages into PDF documents or raster screenshots. Clients submit work
//! under a caller-chosen key; a persistent priority queue schedules it, a
//! browser-backed worker produces the artifact on disk, and the artifact is
//! served back by key.
//!
//! ## Architecture
//!
//! PDF and screenshot rendering are two instances of the same subsystem,
//! parameterized by a [`renderer::Renderer`]:
//!
//! - [`store::JobStore`]: in-memory job map with a debounced JSON snapshot
//!   on disk; interrupted jobs are re-queued on startup.
//! - [`scheduler::Scheduler`]: trigger-coalesced selection of the next
//!   runnable job by (priority, age, key) under a concurrency ceiling.
//! - [`worker::RenderWorker`]: drives a page through load, waits, capture,
//!   and the artifact write, with retries, per-attempt timeouts, and
//!   cooperative cancellation.
//! - [`browser_pool::BrowserPool`]: one lazily launched shared browser per
//!   kind; jobs with their own launch options get a dedicated browser.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_service::{Config, RenderService, RenderOptions, SourceKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = RenderService::new(Config::default()).await?;
//!
//!     let job = service
//!         .submit_pdf(
//!             "invoice-1",
//!             SourceKind::InlineHtml,
//!             "<h1>Hello</h1>".to_string(),
//!             RenderOptions::default(),
//!             false,
//!         )
//!         .await?;
//!     println!("queued: {} ({})", job.key, job.status);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Configuration snapshot and browser launch settings
pub mod config;

/// Error types surfaced by the core
pub mod error;

/// Job model, statuses, and render options
pub mod job;

/// Shared browser management per render kind
pub mod browser_pool;

/// In-memory job store with debounced snapshot persistence
pub mod store;

/// Priority selection and dispatch
pub mod scheduler;

/// The capability turning a loaded page into artifact bytes
pub mod renderer;

/// Render workers: retries, timeouts, cancellation
pub mod worker;

/// Date-partitioned artifact naming
pub mod naming;

/// Artifact download handles
pub mod artifact;

/// URL validation and HTML sanitization seams
pub mod safety;

/// The submission facade wiring both render kinds
pub mod service;

/// Pipeline metrics
pub mod metrics;

/// Command-line interface implementation
pub mod cli;


pub use artifact::*;
pub use browser_pool::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use job::*;
pub use metrics::*;
pub use naming::{date_folder, error_screenshot_filename, filename, parse, ParsedArtifact};
pub use renderer::*;
pub use safety::*;
pub use scheduler::*;
pub use service::*;
pub use store::*;
pub use worker::*;
