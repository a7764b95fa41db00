//! Configuration stage: repair, output directory, siteinfo

use super::context::{BundleRun, Stores};
use crate::error::{Error, Result};
use crate::repair::repair;
use crate::types::Stage;
use crate::utils::create_private_dir;

impl BundleRun<'_> {
    /// Repair the manifest, create the output directory and snapshot siteinfo
    pub(crate) async fn configure(&mut self) -> Result<()> {
        // Once per wiki during repair and once for its siteinfo, plus slack
        // for the shared repository wiki repair may append
        let steps = 2 * (self.manifest.wikis.len() as u64 + 1);
        self.progress.start_stage(Stage::Configuration, steps);

        repair(
            &mut self.manifest,
            &self.config.fetch,
            self.api,
            &self.fetchers.siteinfo,
            Some(&self.progress),
        )
        .await?;

        self.prepare_output().await?;

        let stores = self.stores()?;
        let siteinfos = self
            .fetchers
            .siteinfo
            .fetch_and_write(
                &self.manifest.wikis,
                &stores.siteinfo,
                &self.output,
                self.config.output.compat,
                &self.progress,
            )
            .await?;
        self.siteinfos = siteinfos;
        Ok(())
    }

    /// Create the output directory (which must not exist) and open the stores
    async fn prepare_output(&mut self) -> Result<()> {
        create_private_dir(&self.output).map_err(|source| Error::OutputExists {
            path: self.output.clone(),
            source,
        })?;
        self.created = true;
        tracing::debug!(output = %self.output.display(), "Created output directory");

        self.stores = Some(Stores::open(&self.output, self.config.output.compat).await?);
        Ok(())
    }
}
