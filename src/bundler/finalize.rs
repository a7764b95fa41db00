//! Finalization: snapshots, store shutdown, packaging, failure cleanup

use super::context::BundleRun;
use crate::archive;
use crate::error::Result;
use crate::manifest::WikiConfig;
use crate::types::Stage;
use crate::utils::{fsync_path, make_readable, remove_path_best_effort, with_suffix};
use serde_json::Value;

/// `nfo.json` body: wiki 0's config with `baseurl` spelled `base_url`
pub(crate) fn nfo_json(wiki: &WikiConfig) -> Result<Value> {
    let mut nfo = serde_json::to_value(wiki)?;
    if let Some(baseurl) = nfo.as_object_mut().and_then(|f| f.remove("baseurl")) {
        nfo["base_url"] = baseurl;
    }
    Ok(nfo)
}

impl BundleRun<'_> {
    /// Write snapshots, close the stores, sync and package the output
    pub(crate) async fn finalize(&mut self) -> Result<()> {
        self.write_snapshots().await?;
        self.close_stores().await;

        // Directory entries are not synced by closing the files in them
        fsync_path(&self.images_dir()).await?;
        fsync_path(&self.output).await?;

        self.progress.start_stage(Stage::Packaging, 0);
        if self.config.output.nozip {
            make_readable(&self.output)?;
        } else {
            archive::package(&self.output, self.config.output.store_db).await?;
        }
        Ok(())
    }

    async fn write_snapshots(&self) -> Result<()> {
        let metabook = serde_json::to_vec(&self.manifest)?;
        tokio::fs::write(self.output.join("metabook.json"), metabook).await?;

        if self.config.output.compat {
            let nfo = serde_json::to_vec(&nfo_json(self.manifest.wiki(0)?)?)?;
            tokio::fs::write(self.output.join("nfo.json"), nfo).await?;
        }
        Ok(())
    }

    pub(crate) async fn close_stores(&mut self) {
        if let Some(stores) = self.stores.take() {
            stores.close().await;
        }
    }

    /// Failure path: close what is open and remove everything this run created
    pub(crate) async fn abort(&mut self) {
        self.close_stores().await;
        if self.created {
            remove_path_best_effort(&self.output);
            remove_path_best_effort(&with_suffix(&self.output, ".tmp"));
            tracing::debug!(output = %self.output.display(), "Removed partial output");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfo_renames_baseurl() {
        let mut wiki = WikiConfig::new("https://en.wikipedia.org/w");
        wiki.prefix = Some("enwiki".into());

        let nfo = nfo_json(&wiki).unwrap();
        assert_eq!(nfo["base_url"], "https://en.wikipedia.org/w");
        assert_eq!(nfo["prefix"], "enwiki");
        assert!(nfo.get("baseurl").is_none());
    }
}
