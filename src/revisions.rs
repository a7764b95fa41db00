//! Revision fetcher (raw wikitext)
//!
//! Fetches expanded wikitext for articles (by revision) and image description
//! pages (latest revision), storing each in `revisions.db`. In compatibility
//! mode the same records are also appended to the flat `revisions-1.txt` dump,
//! one `\n\f --page-- <json>\n<wikitext>` entry per page.

use crate::api::{ApiClient, ApiQuery, PageSelector, first_page};
use crate::db::{KvStore, wiki_key};
use crate::error::{Error, Result};
use crate::guard::ConcurrencyGuard;
use crate::manifest::WikiConfig;
use crate::progress::ProgressReporter;
use crate::types::RevisionRecord;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

/// File name of the flat revisions dump
pub const DUMP_FILE: &str = "revisions-1.txt";

/// One page whose wikitext should be bundled
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionTask {
    /// Wiki to fetch from
    pub wiki: usize,
    /// Title as shown in status messages
    pub title: String,
    /// Specific revision; latest when `None`
    pub revision: Option<u64>,
    /// Title to query instead of `title` (namespace-normalized image pages)
    pub canonical_title: Option<String>,
}

#[derive(Serialize)]
struct DumpHeader<'a> {
    expanded: u8,
    ns: i64,
    revid: u64,
    title: &'a str,
    wiki: usize,
}

/// Wikitext fetcher
#[derive(Debug)]
pub struct RevisionsFetcher {
    api: ApiClient,
    guard: ConcurrencyGuard,
}

impl RevisionsFetcher {
    /// Create a fetcher with at most `limit` requests in flight
    pub fn new(api: ApiClient, limit: usize) -> Self {
        Self {
            api,
            guard: ConcurrencyGuard::new("revisions", limit),
        }
    }

    /// Fetch one page; `None` when the wiki has no such page
    pub async fn fetch_one(&self, wikis: &[WikiConfig], task: &RevisionTask) -> Result<Option<RevisionRecord>> {
        let config = wikis
            .get(task.wiki)
            .ok_or_else(|| Error::config("wikis", format!("wiki index {} out of range", task.wiki)))?;
        let title = task.canonical_title.as_deref().unwrap_or(&task.title);
        let selector = PageSelector::new(title, task.revision);

        let query = ApiQuery::new("query")
            .param("prop", "revisions")
            .param("rvprop", "content|ids")
            .flag("rvexpandtemplates")
            .select(&selector);
        let query = match selector {
            PageSelector::Title(_) => query.flag("redirects"),
            PageSelector::Revision(_) => query,
        };

        let response = self.api.request(&config.baseurl, &query).await?;
        Ok(record_from_response(task.wiki, title, &response))
    }

    /// Fetch every task, storing records and optionally appending the dump
    ///
    /// Reports one progress step per task. Returns the number of records
    /// written.
    pub async fn fetch_and_write(
        &self,
        wikis: &[WikiConfig],
        tasks: &[RevisionTask],
        store: &KvStore,
        dump: Option<&Path>,
        progress: &ProgressReporter,
    ) -> Result<usize> {
        let dump = match dump {
            Some(path) => Some(Mutex::new(BufWriter::new(tokio::fs::File::create(path).await?))),
            None => None,
        };

        let jobs = tasks.iter().map(|task| {
            let dump = dump.as_ref();
            async move {
                let _slot = self.guard.acquire().await;
                progress.report(format!("{}:{}", wikis.get(task.wiki).map_or("?", WikiConfig::label), task.title));
                let Some(record) = self.fetch_one(wikis, task).await? else {
                    return Ok::<_, Error>(0usize);
                };
                store.put(&wiki_key(record.wiki, record.revid), &record).await?;
                if let Some(dump) = dump {
                    let entry = dump_entry(&record)?;
                    dump.lock().await.write_all(entry.as_bytes()).await?;
                }
                Ok(1)
            }
        });
        let written: usize = futures::future::join_all(jobs)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sum();

        if let Some(dump) = dump {
            let mut writer = dump.into_inner();
            writer.flush().await?;
            writer.into_inner().sync_all().await?;
        }
        Ok(written)
    }
}

/// Extract the first revision of the single page in a `prop=revisions` response
pub fn record_from_response(wiki: usize, requested: &str, response: &Value) -> Option<RevisionRecord> {
    let Some(page) = first_page(response) else {
        tracing::warn!(wiki, title = %requested, "Revision response has no page");
        return None;
    };
    if page.get("missing").is_some() || page.get("invalid").is_some() {
        tracing::warn!(wiki, title = %requested, "Revision not found");
        return None;
    }

    let revision = page.get("revisions").and_then(|r| r.get(0))?;
    let content = revision
        .get("*")
        .or_else(|| revision.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(RevisionRecord {
        wiki,
        pageid: page.get("pageid").and_then(Value::as_u64).unwrap_or_default(),
        ns: page.get("ns").and_then(Value::as_i64).unwrap_or_default(),
        title: page
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(requested)
            .to_string(),
        revid: revision.get("revid").and_then(Value::as_u64).unwrap_or_default(),
        expanded: 1,
        content: content.to_string(),
        fetched_at: chrono::Utc::now(),
    })
}

/// One `revisions-1.txt` entry
pub fn dump_entry(record: &RevisionRecord) -> Result<String> {
    let header = serde_json::to_string(&DumpHeader {
        expanded: record.expanded,
        ns: record.ns,
        revid: record.revid,
        title: &record.title,
        wiki: record.wiki,
    })?;
    Ok(format!("\n\u{c} --page-- {header}\n{}", record.content))
}
