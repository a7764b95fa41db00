//! Manifest repair
//!
//! Normalizes a manifest before anything is fetched: applies the table of
//! contents and image size options, fills in each wiki's rendering service,
//! site prefix (from siteinfo) and file repositories (from
//! `meta=filerepoinfo`), and settles the collection language.
//!
//! A shared file repository served by a wiki that is not in the list gets a
//! wiki entry of its own appended, which is then repaired like the others.
//! Repairing an already repaired manifest changes nothing and issues no
//! requests beyond cached siteinfo.

use crate::api::{ApiClient, ApiQuery};
use crate::config::{FetchConfig, TocMode};
use crate::error::{Error, Result};
use crate::manifest::{COMMONS_BASEURL, FileRepo, Manifest, WikiConfig};
use crate::progress::ProgressReporter;
use crate::siteinfo::SiteinfoFetcher;
use serde_json::{Value, json};

/// Where a non-local file repository's wiki lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepoLink {
    /// Already in the wiki list
    Existing(usize),
    /// Needs a new wiki entry with this base URL
    Missing(String),
}

/// Resolve the wiki serving `repo`, as seen from wiki `own`
pub fn link_repo(wikis: &[WikiConfig], repo: &FileRepo, own: usize) -> RepoLink {
    if repo.local {
        return RepoLink::Existing(own);
    }
    let script_dir = repo.script_dir_url.as_deref().unwrap_or(COMMONS_BASEURL);
    match wikis.iter().position(|w| w.baseurl == script_dir) {
        Some(idx) => RepoLink::Existing(idx),
        None => RepoLink::Missing(script_dir.to_string()),
    }
}

/// Repair `manifest` in place
pub async fn repair(
    manifest: &mut Manifest,
    options: &FetchConfig,
    api: &ApiClient,
    siteinfo: &SiteinfoFetcher,
    progress: Option<&ProgressReporter>,
) -> Result<()> {
    match options.toc {
        TocMode::Auto => {}
        TocMode::Yes => manifest.toc = Some(true),
        TocMode::No => manifest.toc = Some(false),
    }
    if manifest.wikis.is_empty() {
        return Err(Error::config("wikis", "manifest lists no wikis"));
    }

    let listed = manifest.wikis.len();
    let mut idx = 0;
    while idx < manifest.wikis.len() {
        if let Some(progress) = progress {
            progress.report(manifest.wikis[idx].baseurl.clone());
        }
        repair_wiki(manifest, idx, options, api, siteinfo).await?;
        idx += 1;
    }
    if manifest.wikis.len() == listed {
        if let Some(progress) = progress {
            progress.report(" ");
        }
    }

    if let Some(size) = options.image_size {
        for wiki in &mut manifest.wikis {
            wiki.imagesize = size;
        }
    }

    if options.lang.is_some() {
        manifest.lang = options.lang.clone();
    }
    if manifest.lang.is_none() {
        let first_wiki = manifest.articles().first().map(|a| a.wiki);
        let lang = match first_wiki {
            Some(wiki) => siteinfo
                .fetch(&manifest.wikis, wiki)
                .await?
                .lang()
                .unwrap_or("en")
                .to_string(),
            None => "en".to_string(),
        };
        manifest.lang = Some(lang);
    }

    manifest.check_references()
}

async fn repair_wiki(
    manifest: &mut Manifest,
    idx: usize,
    options: &FetchConfig,
    api: &ApiClient,
    siteinfo: &SiteinfoFetcher,
) -> Result<()> {
    let wiki = &mut manifest.wikis[idx];
    if wiki.parsoid.is_none() {
        wiki.parsoid = options.render_service.clone();
    }

    if manifest.wikis[idx].prefix.is_none() {
        let info = siteinfo.fetch(&manifest.wikis, idx).await?;
        let wikiid = info.wikiid().ok_or_else(|| {
            Error::PrefixResolution(format!(
                "siteinfo of {} has no wikiid",
                manifest.wikis[idx].baseurl
            ))
        })?;
        manifest.wikis[idx].prefix = Some(wikiid.to_string());
    }

    if manifest.wikis[idx].filerepos.is_none() {
        let repos = fetch_file_repos(api, &manifest.wikis[idx].baseurl).await?;
        let mut linked = Vec::with_capacity(repos.len());
        for mut repo in repos {
            let target = match link_repo(&manifest.wikis, &repo, idx) {
                RepoLink::Existing(target) => target,
                RepoLink::Missing(baseurl) => {
                    tracing::info!(repo = %repo.name, baseurl = %baseurl, "Adding wiki for shared file repository");
                    let mut shared = if baseurl == COMMONS_BASEURL {
                        WikiConfig::commons()
                    } else {
                        WikiConfig::new(baseurl)
                    };
                    shared.parsoid = options.render_service.clone();
                    manifest.wikis.push(shared);
                    manifest.wikis.len() - 1
                }
            };
            repo.wiki = Some(target);
            linked.push(repo);
        }
        manifest.wikis[idx].filerepos = Some(linked);
    }
    Ok(())
}

async fn fetch_file_repos(api: &ApiClient, baseurl: &str) -> Result<Vec<FileRepo>> {
    let query = ApiQuery::new("query").param("meta", "filerepoinfo");
    let response = api.request(baseurl, &query).await?;
    let repos = response
        .get("query")
        .and_then(|q| q.get("repos"))
        .and_then(Value::as_array)
        .ok_or_else(|| Error::invalid_response(baseurl, "filerepoinfo response has no repos"))?;

    repos
        .iter()
        .map(|raw| {
            let mut repo: FileRepo = serde_json::from_value(raw.clone())
                .map_err(|e| Error::invalid_response(baseurl, format!("bad file repository: {e}")))?;
            repo.extra.insert("type".into(), json!("filerepo"));
            Ok(repo)
        })
        .collect()
}
