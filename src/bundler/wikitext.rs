//! Wikitext stage (compatibility mode): raw revisions and the attribution page

use super::context::BundleRun;
use crate::attribution;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::revisions::{DUMP_FILE, RevisionTask};
use crate::types::{ResolvedImage, Stage};

/// Key of the rendered attribution page in `parsoid.db`
pub(crate) const ATTRIBUTION_KEY: &str = "attribution";

/// Pages whose wikitext goes into the bundle
///
/// Every article at its fetched revision, then every image description page
/// at its latest revision. An image page is fetched from the wiki serving the
/// image's repository, with its namespace normalized to `File:` since
/// localized namespace names are not understood by a shared repository.
pub(crate) fn revision_tasks(manifest: &Manifest, images: &[ResolvedImage]) -> Vec<RevisionTask> {
    let mut tasks: Vec<RevisionTask> = manifest
        .articles()
        .into_iter()
        .map(|article| RevisionTask {
            wiki: article.wiki,
            title: article.title.clone(),
            revision: article.revision,
            canonical_title: None,
        })
        .collect();

    for image in images {
        let reference = &image.reference;
        let serving = manifest
            .wikis
            .get(reference.wiki)
            .and_then(|w| w.filerepos.as_ref())
            .into_iter()
            .flatten()
            .find(|repo| image.imagerepository.as_deref() == Some(repo.name.as_str()))
            .and_then(|repo| repo.wiki)
            .unwrap_or(reference.wiki);

        let canonical = match reference.short.split_once(':') {
            Some((ns, rest)) if !ns.is_empty() => format!("File:{rest}"),
            _ => reference.short.clone(),
        };
        tasks.push(RevisionTask {
            wiki: serving,
            title: reference.short.clone(),
            revision: None,
            canonical_title: Some(canonical),
        });
    }
    tasks
}

impl BundleRun<'_> {
    /// Fetch raw wikitext and build the attribution page
    pub(crate) async fn fetch_wikitext(&mut self) -> Result<()> {
        if !self.config.output.compat {
            self.progress.start_stage(Stage::Wikitext, 0);
            return Ok(());
        }

        let tasks = revision_tasks(&self.manifest, &self.resolved);
        // One step per page, three for the attribution page
        self.progress
            .start_stage(Stage::Wikitext, tasks.len() as u64 + 3);

        let stores = self.stores()?;
        let revisions = stores
            .revisions
            .as_ref()
            .ok_or_else(|| Error::Other("revisions store is not open".to_string()))?;
        let written = self
            .fetchers
            .revisions
            .fetch_and_write(
                &self.manifest.wikis,
                &tasks,
                revisions,
                Some(&self.output.join(DUMP_FILE)),
                &self.progress,
            )
            .await?;

        let page = attribution::create(
            &self.manifest,
            &stores.authors,
            &stores.imageinfo,
            &self.siteinfos,
            &self.fetchers.articles,
            &self.progress,
        )
        .await?;
        tokio::fs::write(self.output.join("attribution.html"), &page.html).await?;
        tokio::fs::write(self.output.join("attribution.wt"), &page.wikitext).await?;
        stores
            .parsoid
            .put_raw(ATTRIBUTION_KEY, &page.html)
            .await?;

        tracing::info!(pages = tasks.len(), written, "Fetched wikitext");
        self.revisions_written = written;
        Ok(())
    }
}
