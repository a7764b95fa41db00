//! Legacy parser output (`action=parse`), compatibility mode only

use crate::api::{ApiClient, ApiQuery, PageSelector};
use crate::error::{Error, Result};
use crate::guard::ConcurrencyGuard;
use crate::manifest::WikiConfig;
use crate::progress::ProgressReporter;
use serde_json::Value;

/// Fetches the `parse` block of the wiki's own parser
#[derive(Debug)]
pub struct LegacyHtmlFetcher {
    api: ApiClient,
    guard: ConcurrencyGuard,
}

impl LegacyHtmlFetcher {
    /// Create a fetcher with at most `limit` requests in flight
    pub fn new(api: ApiClient, limit: usize) -> Self {
        Self {
            api,
            guard: ConcurrencyGuard::new("legacy-html", limit),
        }
    }

    /// Parse one page, by revision when known
    pub async fn fetch(
        &self,
        wikis: &[WikiConfig],
        wiki: usize,
        title: &str,
        revision: Option<u64>,
        progress: Option<&ProgressReporter>,
    ) -> Result<Value> {
        let config = wikis
            .get(wiki)
            .ok_or_else(|| Error::config("wikis", format!("wiki index {wiki} out of range")))?;
        let _slot = self.guard.acquire().await;

        let selector = PageSelector::new(title, revision);
        if let Some(progress) = progress {
            progress.report(format!("{}:{} [PHP, {}]", config.label(), title, selector.describe()));
        }

        let query = ApiQuery::new("parse").flag("redirects");
        let query = match &selector {
            PageSelector::Revision(rev) => query.param("oldid", rev.to_string()),
            PageSelector::Title(title) => query.param("title", title.clone()),
        };
        let mut response = self.api.request(&config.baseurl, &query).await?;
        match response.get_mut("parse") {
            Some(parse) => Ok(parse.take()),
            None => Err(Error::invalid_response(&config.baseurl, "parse response has no parse block")),
        }
    }
}
