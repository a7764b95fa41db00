//! Author fetcher (`prop=contributors`)
//!
//! Contributor lists are collected across every continuation page. The number
//! of anonymous contributors, when the wiki reports one, is appended as the
//! sentinel entry `ANONIPEDITS:<n>`.

use crate::api::{ApiClient, ApiQuery, PageSelector};
use crate::error::{Error, Result};
use crate::guard::ConcurrencyGuard;
use crate::manifest::WikiConfig;
use crate::progress::ProgressReporter;
use serde_json::Value;

/// Prefix of the anonymous-contributor sentinel
pub const ANON_SENTINEL: &str = "ANONIPEDITS:";

/// Contributor-list fetcher
#[derive(Debug)]
pub struct AuthorsFetcher {
    api: ApiClient,
    guard: ConcurrencyGuard,
}

impl AuthorsFetcher {
    /// Create a fetcher with at most `limit` articles in flight
    pub fn new(api: ApiClient, limit: usize) -> Self {
        Self {
            api,
            guard: ConcurrencyGuard::new("authors", limit),
        }
    }

    /// Contributors of one article, by revision when known
    pub async fn fetch(
        &self,
        wikis: &[WikiConfig],
        wiki: usize,
        title: &str,
        revision: Option<u64>,
        progress: Option<&ProgressReporter>,
    ) -> Result<Vec<String>> {
        let config = wikis
            .get(wiki)
            .ok_or_else(|| Error::config("wikis", format!("wiki index {wiki} out of range")))?;
        let _slot = self.guard.acquire().await;

        let selector = PageSelector::new(title, revision);
        if let Some(progress) = progress {
            progress.report(format!(
                "{}:{} [authors, {}]",
                config.label(),
                title,
                selector.describe()
            ));
        }

        let query = ApiQuery::new("query")
            .param("prop", "contributors")
            .param("pclimit", "500")
            .select(&selector);
        let responses = self.api.query_continued(&config.baseurl, query).await?;
        Ok(collect_contributors(&responses))
    }
}

/// Merge the contributor pages of a continued query
pub fn collect_contributors(responses: &[Value]) -> Vec<String> {
    let mut names = Vec::new();
    let mut anons: Option<u64> = None;

    for page in responses.iter().filter_map(crate::api::first_page) {
        if let Some(n) = page.get("anoncontributors").and_then(Value::as_u64).filter(|n| *n > 0) {
            anons = Some(n);
        }
        let contributors = page.get("contributors").and_then(Value::as_array);
        names.extend(
            contributors
                .into_iter()
                .flatten()
                .filter_map(|c| c.get("name").and_then(Value::as_str))
                .map(str::to_string),
        );
    }

    if let Some(n) = anons {
        names.push(format!("{ANON_SENTINEL}{n}"));
    }
    names
}
