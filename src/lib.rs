//! # wiki-bundler
//!
//! Fetches wiki articles, their media and attribution metadata into an
//! offline book bundle.
//!
//! ## Design Philosophy
//!
//! wiki-bundler is designed to be:
//! - **Bounded** - Every class of request has its own concurrency limit
//! - **Tolerant where it can be** - A broken image never fails a bundle
//! - **Clean on failure** - A failed run leaves nothing behind on disk
//! - **Library-first** - No CLI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to progress events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use wiki_bundler::{BundleConfig, Bundler, Manifest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = BundleConfig::new("bundle.zip");
//!     config.fetch.render_service = Some("https://rest.example.org/".to_string());
//!
//!     let bundler = Bundler::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = bundler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let manifest = bundler
//!         .manifest_from_articles(&[("en".to_string(), "Rust_(programming_language)".to_string())])
//!         .await?;
//!     let report = bundler.bundle(manifest).await?;
//!     println!("Wrote {}", report.output.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Wiki action API client
pub mod api;
/// Bundle packaging
pub mod archive;
/// Attribution page synthesis
pub mod attribution;
/// Article contributors
pub mod authors;
/// Bundle orchestrator (decomposed into stage submodules)
pub mod bundler;
/// Configuration types
pub mod config;
/// Key/value persistence layer
pub mod db;
/// Error types
pub mod error;
/// Bounded concurrency guard
pub mod guard;
/// Retrying HTTP client
pub mod http;
/// Image metadata and downloads
pub mod image;
/// Legacy parser output
pub mod legacy_html;
/// Collection manifest
pub mod manifest;
/// Stage-based progress reporting
pub mod progress;
/// Rendered article fetching
pub mod render;
/// Manifest repair
pub mod repair;
/// Retry logic with exponential backoff
pub mod retry;
/// Raw wikitext revisions
pub mod revisions;
/// Site configuration
pub mod siteinfo;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use bundler::{BundleReport, Bundler};
pub use config::{BundleConfig, FetchConfig, OutputConfig, RetryConfig, TocMode};
pub use db::KvStore;
pub use error::{DatabaseError, Error, Result};
pub use guard::ConcurrencyGuard;
pub use manifest::{Article, Chapter, Manifest, Node, WikiConfig};
pub use progress::ProgressReporter;
pub use types::{Event, ImageMetadata, ImageRef, RevisionRecord, Stage};
