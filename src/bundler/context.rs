//! Run-scoped state shared by the stages

use super::BundleReport;
use crate::api::ApiClient;
use crate::authors::AuthorsFetcher;
use crate::config::BundleConfig;
use crate::db::{KvStore, files};
use crate::error::{Error, Result};
use crate::image::ImageResolver;
use crate::legacy_html::LegacyHtmlFetcher;
use crate::manifest::Manifest;
use crate::progress::ProgressReporter;
use crate::render::ArticleFetcher;
use crate::revisions::RevisionsFetcher;
use crate::siteinfo::{Siteinfo, SiteinfoFetcher};
use crate::types::{Event, ImageRef, ResolvedImage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One guarded fetcher per request class
#[derive(Debug)]
pub(crate) struct Fetchers {
    pub(crate) siteinfo: SiteinfoFetcher,
    pub(crate) articles: ArticleFetcher,
    pub(crate) legacy_html: LegacyHtmlFetcher,
    pub(crate) authors: AuthorsFetcher,
    pub(crate) images: ImageResolver,
    pub(crate) revisions: RevisionsFetcher,
}

impl Fetchers {
    fn new(config: &BundleConfig, api: &ApiClient) -> Self {
        let fetch = &config.fetch;
        Self {
            siteinfo: SiteinfoFetcher::new(api.clone(), fetch.siteinfo_limit),
            articles: ArticleFetcher::new(api.http().clone(), fetch.article_limit, fetch.cache_dir.clone()),
            legacy_html: LegacyHtmlFetcher::new(api.clone(), fetch.legacy_html_limit),
            authors: AuthorsFetcher::new(api.clone(), fetch.author_limit),
            images: ImageResolver::new(
                api.clone(),
                fetch.image_limit,
                config.image_retries,
                config.output.compat_filenames,
            ),
            revisions: RevisionsFetcher::new(api.clone(), fetch.revision_limit),
        }
    }
}

/// Open store handles of one bundle
#[derive(Debug)]
pub(crate) struct Stores {
    pub(crate) siteinfo: KvStore,
    pub(crate) parsoid: KvStore,
    pub(crate) imageinfo: KvStore,
    pub(crate) authors: KvStore,
    /// Compatibility mode only
    pub(crate) html: Option<KvStore>,
    /// Compatibility mode only
    pub(crate) revisions: Option<KvStore>,
}

impl Stores {
    pub(crate) async fn open(dir: &Path, compat: bool) -> Result<Self> {
        let siteinfo = KvStore::open(&dir.join(files::SITEINFO)).await?;
        let parsoid = KvStore::open(&dir.join(files::PARSOID)).await?;
        let imageinfo = KvStore::open(&dir.join(files::IMAGEINFO)).await?;
        let authors = KvStore::open(&dir.join(files::AUTHORS)).await?;
        let (html, revisions) = if compat {
            (
                Some(KvStore::open(&dir.join(files::HTML)).await?),
                Some(KvStore::open(&dir.join(files::REVISIONS)).await?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            siteinfo,
            parsoid,
            imageinfo,
            authors,
            html,
            revisions,
        })
    }

    pub(crate) async fn close(&self) {
        for store in [&self.siteinfo, &self.parsoid, &self.imageinfo, &self.authors] {
            store.close().await;
        }
        for store in [&self.html, &self.revisions].into_iter().flatten() {
            store.close().await;
        }
    }
}

/// State of one bundling run
pub(crate) struct BundleRun<'a> {
    pub(crate) config: &'a BundleConfig,
    pub(crate) api: &'a ApiClient,
    pub(crate) fetchers: Fetchers,
    pub(crate) progress: ProgressReporter,
    pub(crate) manifest: Manifest,
    pub(crate) output: PathBuf,
    /// Set once this run created `output`; only then is it ours to remove
    pub(crate) created: bool,
    pub(crate) stores: Option<Stores>,
    pub(crate) siteinfos: Vec<Arc<Siteinfo>>,
    /// Discovered images keyed by resource URL; first reference wins
    pub(crate) images: BTreeMap<String, ImageRef>,
    pub(crate) resolved: Vec<ResolvedImage>,
    pub(crate) revisions_written: usize,
}

impl<'a> BundleRun<'a> {
    pub(crate) fn new(
        config: &'a BundleConfig,
        api: &'a ApiClient,
        events: broadcast::Sender<Event>,
        manifest: Manifest,
    ) -> Self {
        Self {
            config,
            api,
            fetchers: Fetchers::new(config, api),
            progress: ProgressReporter::new(events),
            manifest,
            output: config.output.output.clone(),
            created: false,
            stores: None,
            siteinfos: Vec::new(),
            images: BTreeMap::new(),
            resolved: Vec::new(),
            revisions_written: 0,
        }
    }

    pub(crate) fn stores(&self) -> Result<&Stores> {
        self.stores
            .as_ref()
            .ok_or_else(|| Error::Other("bundle stores are not open".to_string()))
    }

    pub(crate) fn images_dir(&self) -> PathBuf {
        self.output.join("images")
    }

    pub(crate) fn report(&self) -> BundleReport {
        BundleReport {
            output: self.output.clone(),
            articles: self.manifest.articles().len(),
            images: self.images.len(),
            downloaded: self.resolved.iter().filter(|i| i.filename.is_some()).count(),
            revisions: self.revisions_written,
        }
    }
}
