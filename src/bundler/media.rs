//! Media stage: metadata and bytes for every unique image

use super::context::BundleRun;
use crate::error::{Error, Result};
use crate::types::{ImageMetadata, Stage};

impl BundleRun<'_> {
    /// Resolve every discovered image and persist its metadata
    ///
    /// Image-level failures never fail the run; the metadata record is written
    /// whether or not the bytes arrived.
    pub(crate) async fn fetch_media(&mut self) -> Result<()> {
        let dir = self.images_dir();
        tokio::fs::create_dir(&dir).await?;
        // Metadata plus download (or skip) per image
        self.progress
            .start_stage(Stage::Media, 2 * self.images.len() as u64);

        let resolved = {
            let this = &*self;
            let stores = this.stores()?;
            let dir = dir.as_path();
            let tasks = this.images.values().cloned().map(|reference| async move {
                let image = this
                    .fetchers
                    .images
                    .resolve(&this.manifest.wikis, reference, dir, Some(&this.progress))
                    .await;
                stores
                    .imageinfo
                    .put(&image.reference.resource, &ImageMetadata::from(&image))
                    .await?;
                Ok::<_, Error>(image)
            });
            futures::future::join_all(tasks)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?
        };

        let downloaded = resolved.iter().filter(|i| i.filename.is_some()).count();
        let missing = resolved.iter().filter(|i| i.missing).count();
        tracing::info!(images = resolved.len(), downloaded, missing, "Fetched media");
        self.resolved = resolved;
        Ok(())
    }
}
