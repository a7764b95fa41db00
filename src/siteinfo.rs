//! Site configuration (`meta=siteinfo`)
//!
//! [`SiteinfoFetcher`] memoizes one in-flight-or-finished lookup per wiki index
//! for the lifetime of a run: concurrent and repeated callers share the same
//! result instead of issuing new requests. A failed lookup is not remembered,
//! so a later caller tries again.

use crate::api::{ApiClient, ApiQuery};
use crate::db::KvStore;
use crate::error::{Error, Result};
use crate::guard::ConcurrencyGuard;
use crate::manifest::WikiConfig;
use crate::progress::ProgressReporter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

const SIPROP: &str = "general|namespaces|interwikimap|namespacealiases|magicwords|rightsinfo";

/// The `query` block of a siteinfo response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Siteinfo(pub Value);

impl Siteinfo {
    /// `general.wikiid`, the site prefix
    pub fn wikiid(&self) -> Option<&str> {
        self.0.get("general")?.get("wikiid")?.as_str()
    }

    /// `general.lang`
    pub fn lang(&self) -> Option<&str> {
        self.0.get("general")?.get("lang")?.as_str()
    }

    /// `interwikimap`, as returned
    pub fn interwikimap(&self) -> &Value {
        self.0.get("interwikimap").unwrap_or(&Value::Null)
    }

    /// `rightsinfo.url` and `rightsinfo.text`
    pub fn rights(&self) -> (Option<&str>, Option<&str>) {
        let rights = self.0.get("rightsinfo");
        let field = |name: &str| rights.and_then(|r| r.get(name)).and_then(Value::as_str);
        (field("url"), field("text"))
    }
}

type Slot = Arc<OnceCell<Arc<Siteinfo>>>;

/// Siteinfo fetcher with a per-wiki single-flight cache
#[derive(Debug)]
pub struct SiteinfoFetcher {
    api: ApiClient,
    guard: ConcurrencyGuard,
    cache: Mutex<HashMap<usize, Slot>>,
}

impl SiteinfoFetcher {
    /// Create a fetcher issuing at most `limit` concurrent requests
    pub fn new(api: ApiClient, limit: usize) -> Self {
        Self {
            api,
            guard: ConcurrencyGuard::new("siteinfo", limit),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Siteinfo of wiki `idx`, fetched at most once per run
    pub async fn fetch(&self, wikis: &[WikiConfig], idx: usize) -> Result<Arc<Siteinfo>> {
        let baseurl = wikis
            .get(idx)
            .map(|w| w.baseurl.clone())
            .ok_or_else(|| Error::config("wikis", format!("wiki index {idx} out of range")))?;

        let slot = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.entry(idx).or_default().clone()
        };

        slot.get_or_try_init(|| async {
            let info = self.guard.run(self.fetch_uncached(&baseurl)).await?;
            Ok::<_, Error>(Arc::new(info))
        })
        .await
        .cloned()
    }

    /// Query siteinfo from `baseurl` without touching the cache
    pub async fn fetch_uncached(&self, baseurl: &str) -> Result<Siteinfo> {
        let query = ApiQuery::new("query")
            .param("meta", "siteinfo")
            .param("siprop", SIPROP);
        let response = self.api.request(baseurl, &query).await?;
        match response.get("query") {
            Some(q) => Ok(Siteinfo(q.clone())),
            None => Err(Error::invalid_response(baseurl, "siteinfo response has no query block")),
        }
    }

    /// Fetch siteinfo for every wiki and persist it
    ///
    /// `siteinfo.db` is keyed by wiki base URL. In compatibility mode wiki 0's
    /// siteinfo is also written to `siteinfo.json` in `output`.
    pub async fn fetch_and_write(
        &self,
        wikis: &[WikiConfig],
        store: &KvStore,
        output: &Path,
        compat: bool,
        progress: &ProgressReporter,
    ) -> Result<Vec<Arc<Siteinfo>>> {
        let tasks = wikis.iter().enumerate().map(|(idx, wiki)| async move {
            let info = self.fetch(wikis, idx).await?;
            progress.report(format!("{} siteinfo", wiki.label()));
            if idx == 0 && compat {
                let json = serde_json::to_vec(&info.0)?;
                tokio::fs::write(output.join("siteinfo.json"), json).await?;
            }
            store.put(&wiki.baseurl, &info.0).await?;
            Ok::<_, Error>(info)
        });

        futures::future::join_all(tasks).await.into_iter().collect()
    }
}
