//! Content stage: rendered articles, legacy HTML, authors
//!
//! Every article of the manifest is dispatched at once; the per-class guards
//! bound what is actually in flight. A failure on any article fails the run,
//! but only after every dispatched sibling has settled.

use super::context::{BundleRun, Stores};
use crate::db::wiki_key;
use crate::error::{Error, Result};
use crate::manifest::{ArticleTask, Visit};
use crate::types::{ImageRef, Stage};

/// What the content stage learned about one article node
#[derive(Debug)]
pub(crate) struct FetchedArticle {
    pub(crate) ordinal: usize,
    pub(crate) revision: u64,
    pub(crate) about: Option<String>,
    pub(crate) is_version_of: Option<String>,
    pub(crate) images: Vec<ImageRef>,
}

/// Steps reported for `visits`: three per node, plus the legacy render per
/// article in compatibility mode
pub(crate) fn content_steps(visits: &[Visit], compat: bool) -> u64 {
    let articles = visits
        .iter()
        .filter(|v| matches!(v, Visit::Article(_)))
        .count() as u64;
    3 * visits.len() as u64 + if compat { articles } else { 0 }
}

impl BundleRun<'_> {
    /// Fetch every article and collect the images it embeds
    pub(crate) async fn fetch_content(&mut self) -> Result<()> {
        let visits = self.manifest.walk();
        self.progress
            .start_stage(Stage::Content, content_steps(&visits, self.config.output.compat));
        let max_redirects = self.config.fetch.redirect_budget();

        let fetched = {
            let this = &*self;
            let stores = this.stores()?;
            let mut tasks = Vec::new();
            for visit in &visits {
                match visit {
                    Visit::Group { kind, title } => {
                        this.progress.report_n(3, format!("{} {}", kind.as_str(), title));
                    }
                    Visit::Article(task) => tasks.push(this.fetch_article(stores, task, max_redirects)),
                }
            }
            futures::future::join_all(tasks)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?
        };

        let mut articles = self.manifest.articles_mut();
        for article in fetched {
            let node = articles.get_mut(article.ordinal).ok_or_else(|| {
                Error::Other(format!("article ordinal {} out of range", article.ordinal))
            })?;
            node.revision = Some(article.revision);
            node.about = article.about;
            node.is_version_of = article.is_version_of;
            for image in article.images {
                self.images.entry(image.resource.clone()).or_insert(image);
            }
        }

        tracing::info!(
            articles = self.manifest.articles().len(),
            images = self.images.len(),
            "Fetched article content"
        );
        Ok(())
    }

    async fn fetch_article(
        &self,
        stores: &Stores,
        task: &ArticleTask,
        max_redirects: usize,
    ) -> Result<FetchedArticle> {
        let wikis = &self.manifest.wikis;
        let rendered = self
            .fetchers
            .articles
            .fetch(
                wikis,
                task.wiki,
                &task.title,
                task.revision,
                max_redirects,
                Some(&self.progress),
            )
            .await?;

        // Revision ids are only unique within one wiki
        let key = wiki_key(task.wiki, rendered.revision);
        stores.parsoid.put_raw(&key, &rendered.html).await?;

        if let Some(html) = &stores.html {
            let parsed = self
                .fetchers
                .legacy_html
                .fetch(wikis, task.wiki, &task.title, Some(rendered.revision), Some(&self.progress))
                .await?;
            html.put(&key, &parsed).await?;
        }

        let authors = self
            .fetchers
            .authors
            .fetch(wikis, task.wiki, &task.title, Some(rendered.revision), Some(&self.progress))
            .await?;
        stores
            .authors
            .put(&wiki_key(task.wiki, &task.title), &authors)
            .await?;

        let label = self.manifest.wiki(task.wiki)?.label();
        self.progress
            .report(format!("{}:{} [complete]", label, task.title));

        Ok(FetchedArticle {
            ordinal: task.ordinal,
            revision: rendered.revision,
            about: rendered.about,
            is_version_of: rendered.is_version_of,
            images: rendered.images,
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Article, Chapter, Manifest, Node};

    #[test]
    fn content_steps_count_groups_and_articles() {
        let mut manifest = Manifest::default();
        manifest.items.push(Node::Article(Article::new("A")));
        manifest.items.push(Node::Chapter(Chapter {
            title: "Part".into(),
            items: vec![Node::Article(Article::new("B"))],
            ..Chapter::default()
        }));

        let visits = manifest.walk();
        assert_eq!(visits.len(), 4);
        assert_eq!(content_steps(&visits, false), 12);
        assert_eq!(content_steps(&visits, true), 14);
    }
}
