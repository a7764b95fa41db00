//! Bundle orchestrator (decomposed into focused submodules)
//!
//! A run moves through its stages strictly in order; nothing is revisited:
//!
//! - [`configure`] - Manifest repair, output directory, siteinfo
//! - [`content`] - Rendered articles, legacy HTML and authors; image discovery
//! - [`media`] - Image metadata and bytes
//! - [`wikitext`] - Raw revisions and the attribution page (compatibility mode)
//! - [`finalize`] - Snapshots, store shutdown, packaging and failure cleanup
//!
//! All run-scoped state (stores, the de-duplicated image map, resolved
//! images) lives in a [`context::BundleRun`] created per call to
//! [`Bundler::bundle`], so one [`Bundler`] can drive several runs at once.

use crate::api::ApiClient;
use crate::config::BundleConfig;
use crate::error::Result;
use crate::http::HttpClient;
use crate::manifest::Manifest;
use crate::siteinfo::SiteinfoFetcher;
use crate::types::{Event, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

mod configure;
mod content;
mod context;
mod finalize;
mod media;
mod wikitext;

use context::BundleRun;

/// Summary of a finished run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleReport {
    /// Final bundle location (directory or archive)
    pub output: PathBuf,
    /// Articles fetched
    pub articles: usize,
    /// Unique images discovered
    pub images: usize,
    /// Images whose bytes are in the bundle
    pub downloaded: usize,
    /// Wikitext revisions written (compatibility mode)
    pub revisions: usize,
}

/// Bundle builder (cloneable; clones share the event channel)
#[derive(Clone)]
pub struct Bundler {
    /// Configuration shared with every run
    pub(crate) config: Arc<BundleConfig>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Wiki API client over the retrying HTTP client
    pub(crate) api: ApiClient,
}

impl std::fmt::Debug for Bundler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundler")
            .field("output", &self.config.output.output)
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

impl Bundler {
    /// Create a bundler
    ///
    /// Validates the configuration and builds the shared HTTP client. No
    /// network or filesystem access happens until [`bundle`](Self::bundle).
    pub fn new(config: BundleConfig) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new(&config.fetch.user_agent, config.retry.clone())?;

        // Buffer generously; a slow subscriber lags rather than blocking the run
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            api: ApiClient::new(http),
        })
    }

    /// Subscribe to progress and lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration this bundler was built with
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Build a bundle from `manifest` at the configured output path
    ///
    /// On failure every partial output is removed before the error is
    /// returned, and an [`Event::Failed`] is published.
    pub async fn bundle(&self, manifest: Manifest) -> Result<BundleReport> {
        tracing::info!(
            output = %self.config.output.output.display(),
            articles = manifest.articles().len(),
            wikis = manifest.wikis.len(),
            compat = self.config.output.compat,
            "Starting bundle"
        );

        let mut run = BundleRun::new(&self.config, &self.api, self.event_tx.clone(), manifest);
        match run.execute().await {
            Ok(report) => {
                tracing::info!(
                    output = %report.output.display(),
                    articles = report.articles,
                    images = report.images,
                    downloaded = report.downloaded,
                    "Bundle complete"
                );
                self.event_tx
                    .send(Event::Done {
                        output: report.output.clone(),
                    })
                    .ok();
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, code = e.code(), "Bundle failed, cleaning up");
                run.abort().await;
                self.event_tx
                    .send(Event::Failed {
                        code: e.code().to_string(),
                        error: e.to_string(),
                    })
                    .ok();
                Err(e)
            }
        }
    }

    /// Build a manifest from `(interwiki prefix, title)` pairs
    ///
    /// Prefixes are resolved against the interwiki map of the configured seed
    /// wiki. See [`Manifest::from_articles`].
    pub async fn manifest_from_articles(&self, articles: &[(String, String)]) -> Result<Manifest> {
        let seed = SiteinfoFetcher::new(self.api.clone(), 1)
            .fetch_uncached(&self.config.fetch.seed_wiki)
            .await?;
        Manifest::from_articles(
            articles,
            seed.interwikimap(),
            self.config.fetch.render_service.as_deref(),
        )
    }
}

impl BundleRun<'_> {
    /// Drive every stage in order
    pub(crate) async fn execute(&mut self) -> Result<BundleReport> {
        self.configure().await?;
        self.fetch_content().await?;
        self.fetch_media().await?;
        self.fetch_wikitext().await?;
        self.finalize().await?;
        self.progress.start_stage(Stage::Done, 0);
        Ok(self.report())
    }
}
