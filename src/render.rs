//! Article Fetcher (rendering service)
//!
//! Fetches the rendered HTML of one article from the wiki's rendering service
//! (`<parsoid>/<prefix>/<title>[?oldid=<rev>]`) and extracts what the bundle
//! needs from it: the redirect target, the canonical revision id, the RDF
//! subject URIs and every embedded image reference.
//!
//! Redirects are followed inside a single guard slot, so a chain longer than
//! the guard's limit cannot deadlock. A look-aside cache directory, when
//! configured, replaces the network entirely for pages it holds.

use crate::api::PageSelector;
use crate::error::{Error, Result};
use crate::guard::ConcurrencyGuard;
use crate::http::HttpClient;
use crate::manifest::WikiConfig;
use crate::progress::ProgressReporter;
use crate::types::ImageRef;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::OnceLock;
use url::Url;

/// Title the attribution page is rendered under
pub const ATTRIBUTION_TITLE: &str = "MediaWiki:Coll-attribution-page";

/// A rendered article after redirect resolution
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedArticle {
    /// Wiki that rendered it
    pub wiki: usize,
    /// Title actually rendered (the redirect target, if any)
    pub title: String,
    /// Canonical revision id
    pub revision: u64,
    /// Full HTML document
    pub html: String,
    /// `about` URI of the document root
    pub about: Option<String>,
    /// Canonical page URL (`dc:isVersionOf`)
    pub is_version_of: Option<String>,
    /// Embedded images, in document order
    pub images: Vec<ImageRef>,
}

/// Everything [`parse_rendered`] extracts from one document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedRender {
    /// Redirect target title
    pub redirect: Option<String>,
    /// `<base href>` with protocol-relative URLs made absolute
    pub base_href: String,
    /// Revision id from the root `about` URI
    pub revision: Option<u64>,
    /// Root `about` URI
    pub about: Option<String>,
    /// `dc:isVersionOf` link target
    pub is_version_of: Option<String>,
    /// Embedded images
    pub images: Vec<ImageRef>,
}

struct Selectors {
    redirect: Selector,
    base: Selector,
    root: Selector,
    version_of: Selector,
    images: Selector,
}

fn selectors() -> Option<&'static Selectors> {
    static SELECTORS: OnceLock<Option<Selectors>> = OnceLock::new();
    SELECTORS
        .get_or_init(|| {
            Some(Selectors {
                redirect: Selector::parse(r#"link[rel="mw:PageProp/redirect"][href]"#).ok()?,
                base: Selector::parse("head > base[href]").ok()?,
                root: Selector::parse("html[about]").ok()?,
                version_of: Selector::parse(r#"link[rel="dc:isVersionOf"][href]"#).ok()?,
                images: Selector::parse(concat!(
                    "figure img[resource], ",
                    r#"*[typeof="mw:Image"] img[resource], "#,
                    r#"*[typeof="mw:Image/Thumb"] img[resource]"#
                ))
                .ok()?,
            })
        })
        .as_ref()
}

/// Extract redirect, revision, RDF subjects and images from rendered HTML
///
/// Image resources are percent-decoded, then resolved against the document's
/// base; the decoded relative form (minus a leading `./`) is the image's
/// short title.
pub fn parse_rendered(html: &str, wiki: usize, imagesize: u32) -> Result<ParsedRender> {
    let sel = selectors().ok_or_else(|| Error::Other("invalid built-in selector".into()))?;
    let doc = Html::parse_document(html);
    let attr = |selector: &Selector, name: &str| {
        doc.select(selector)
            .next()
            .and_then(|el| el.value().attr(name))
            .map(str::to_string)
    };

    let redirect = attr(&sel.redirect, "href").map(|href| {
        let href = href.strip_prefix("./").unwrap_or(&href);
        percent_decode(href)
    });
    let base_href = attr(&sel.base, "href")
        .map(|b| absolutize(&b))
        .unwrap_or_default();
    let about = attr(&sel.root, "about");
    let revision = about.as_deref().and_then(revision_from_about);
    let is_version_of = attr(&sel.version_of, "href").map(|v| absolutize(&v));

    let base = Url::parse(&base_href).ok();
    let resolve = |rel: &str| match &base {
        Some(base) => base
            .join(rel)
            .map(String::from)
            .unwrap_or_else(|_| rel.to_string()),
        None => rel.to_string(),
    };

    let images = doc
        .select(&sel.images)
        .filter_map(|img| {
            let resource = percent_decode(img.value().attr("resource")?);
            let src = img.value().attr("src").unwrap_or_default();
            Some(ImageRef {
                wiki,
                short: resource.strip_prefix("./").unwrap_or(&resource).to_string(),
                resource: resolve(&resource),
                src: resolve(src),
                imagesize,
            })
        })
        .collect();

    Ok(ParsedRender {
        redirect,
        base_href,
        revision,
        about,
        is_version_of,
        images,
    })
}

/// Trailing `revision/<digits>` of an `about` URI
fn revision_from_about(about: &str) -> Option<u64> {
    let (_, tail) = about.rsplit_once("revision/")?;
    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok().filter(|rev| *rev > 0)
}

fn absolutize(href: &str) -> String {
    match href.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => href.to_string(),
    }
}

fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Rendering-service client, guarded per request class
#[derive(Debug)]
pub struct ArticleFetcher {
    http: HttpClient,
    guard: ConcurrencyGuard,
    cache_dir: Option<PathBuf>,
}

impl ArticleFetcher {
    /// Create a fetcher with at most `limit` articles in flight
    pub fn new(http: HttpClient, limit: usize, cache_dir: Option<PathBuf>) -> Self {
        Self {
            http,
            guard: ConcurrencyGuard::new("articles", limit),
            cache_dir,
        }
    }

    /// Fetch and parse one article, following up to `max_redirects` redirects
    ///
    /// A redirect target is fetched at its latest revision. When the budget is
    /// exhausted the last document fetched is returned as-is. A document
    /// without a revision id is [`Error::MissingRevision`].
    pub async fn fetch(
        &self,
        wikis: &[WikiConfig],
        wiki: usize,
        title: &str,
        revision: Option<u64>,
        max_redirects: usize,
        progress: Option<&ProgressReporter>,
    ) -> Result<RenderedArticle> {
        let config = wiki_config(wikis, wiki)?;
        let _slot = self.guard.acquire().await;
        if let Some(progress) = progress {
            progress.report(format!(
                "{}:{} [Parsoid, {}]",
                config.label(),
                title,
                PageSelector::new(title, revision).describe()
            ));
        }

        let mut title = title.to_string();
        let mut revision = revision;
        let mut remaining = max_redirects;
        loop {
            let html = self.load(config, &title, revision).await?;
            let parsed = parse_rendered(&html, wiki, config.imagesize)?;

            if let Some(target) = parsed.redirect.filter(|_| remaining > 0) {
                tracing::debug!(wiki, from = %title, to = %target, remaining, "Following redirect");
                title = target;
                revision = None;
                remaining -= 1;
                continue;
            }

            let revision = parsed.revision.ok_or_else(|| Error::MissingRevision {
                wiki: config.label().to_string(),
                title: title.clone(),
            })?;
            return Ok(RenderedArticle {
                wiki,
                title,
                revision,
                html,
                about: parsed.about,
                is_version_of: parsed.is_version_of,
                images: parsed.images,
            });
        }
    }

    /// Render a wikitext snippet on `wiki` as if it were page `title`
    pub async fn render_wikitext(
        &self,
        wikis: &[WikiConfig],
        wiki: usize,
        wikitext: &str,
        title: &str,
    ) -> Result<String> {
        let config = wiki_config(wikis, wiki)?;
        let url = service_url(config, title, None)?;
        self.guard
            .run(self.http.post_form_text(&url, &[("wt", wikitext)]))
            .await
    }

    async fn load(&self, config: &WikiConfig, title: &str, revision: Option<u64>) -> Result<String> {
        if let Some(dir) = &self.cache_dir {
            let mut path = dir.join(config.label()).join(title);
            if let Some(rev) = revision {
                path.push(rev.to_string());
            }
            if let Ok(cached) = tokio::fs::read_to_string(&path).await {
                tracing::debug!(path = %path.display(), "Rendered article served from cache");
                return Ok(cached);
            }
        }

        let url = service_url(config, title, revision)?;
        self.http.get_text(&url).await
    }
}

fn wiki_config(wikis: &[WikiConfig], wiki: usize) -> Result<&WikiConfig> {
    wikis
        .get(wiki)
        .ok_or_else(|| Error::config("wikis", format!("wiki index {wiki} out of range")))
}

/// `<parsoid>/<prefix>/<title>[?oldid=<rev>]`
fn service_url(config: &WikiConfig, title: &str, revision: Option<u64>) -> Result<String> {
    let base = config
        .parsoid
        .as_deref()
        .ok_or_else(|| Error::config("parsoid", format!("{} has no rendering service", config.baseurl)))?;
    let prefix = config
        .prefix
        .as_deref()
        .ok_or_else(|| Error::config("prefix", format!("{} has no site prefix", config.baseurl)))?;

    let mut url = Url::parse(base)
        .map_err(|e| Error::config("parsoid", format!("bad rendering service URL {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| Error::config("parsoid", format!("rendering service URL {base:?} cannot be a base")))?
        .pop_if_empty()
        .push(prefix)
        .push(title);
    if let Some(rev) = revision {
        url.query_pairs_mut().append_pair("oldid", &rev.to_string());
    }
    Ok(url.into())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page(revid: Option<u64>, redirect: Option<&str>, body: &str) -> String {
        let about = revid
            .map(|r| format!(r#" about="http://en.wikipedia.org/wiki/Special:Redirect/revision/{r}""#))
            .unwrap_or_default();
        let redirect = redirect
            .map(|t| format!(r#"<link rel="mw:PageProp/redirect" href="./{t}"/>"#))
            .unwrap_or_default();
        format!(
            r#"<!DOCTYPE html><html{about}><head><base href="//en.wikipedia.org/wiki/"/>{redirect}<link rel="dc:isVersionOf" href="//en.wikipedia.org/wiki/Page"/></head><body>{body}</body></html>"#
        )
    }

    fn wikis(parsoid: &str) -> Vec<WikiConfig> {
        let mut wiki = WikiConfig::new("https://en.wikipedia.org/w");
        wiki.prefix = Some("enwiki".into());
        wiki.parsoid = Some(parsoid.to_string());
        vec![wiki]
    }

    fn fetcher(limit: usize, cache_dir: Option<PathBuf>) -> ArticleFetcher {
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        ArticleFetcher::new(HttpClient::new("test", retry).unwrap(), limit, cache_dir)
    }

    #[test]
    fn parse_extracts_revision_subjects_and_images() {
        let html = page(
            Some(12345),
            None,
            r#"<figure typeof="mw:Image/Thumb"><a href="./File:Foo_bar.jpg"><img resource="./File:Foo%20bar.jpg" src="//upload.wikimedia.org/thumb/a/ab/Foo_bar.jpg/220px-Foo_bar.jpg"/></a></figure>
               <span typeof="mw:Image"><img resource="./File:Icon.svg" src="//upload.wikimedia.org/thumb/1/12/Icon.svg/20px-Icon.svg.png"/></span>
               <img resource="./File:Loose.png" src="x.png"/>"#,
        );
        let parsed = parse_rendered(&html, 0, 800).unwrap();

        assert_eq!(parsed.revision, Some(12345));
        assert_eq!(parsed.redirect, None);
        assert_eq!(parsed.base_href, "https://en.wikipedia.org/wiki/");
        assert_eq!(parsed.is_version_of.as_deref(), Some("https://en.wikipedia.org/wiki/Page"));
        assert_eq!(parsed.images.len(), 2);

        let first = &parsed.images[0];
        assert_eq!(first.short, "File:Foo bar.jpg");
        assert_eq!(first.resource, "https://en.wikipedia.org/wiki/File:Foo%20bar.jpg");
        assert_eq!(
            first.src,
            "https://upload.wikimedia.org/thumb/a/ab/Foo_bar.jpg/220px-Foo_bar.jpg"
        );
        assert_eq!(first.imagesize, 800);
        assert_eq!(parsed.images[1].short, "File:Icon.svg");
    }

    #[test]
    fn revision_requires_trailing_digits() {
        assert_eq!(revision_from_about("http://x/revision/42"), Some(42));
        assert_eq!(revision_from_about("http://x/revision/42/extra"), None);
        assert_eq!(revision_from_about("http://x/revision/"), None);
        assert_eq!(revision_from_about("http://x/page/7"), None);
    }

    #[test]
    fn service_url_appends_prefix_title_and_oldid() {
        let wiki = &wikis("http://parsoid.local/base/")[0];
        assert_eq!(
            service_url(wiki, "A/B c", Some(9)).unwrap(),
            "http://parsoid.local/base/enwiki/A%2FB%20c?oldid=9"
        );
        let mut no_service = wiki.clone();
        no_service.parsoid = None;
        assert!(matches!(service_url(&no_service, "A", None), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn redirect_chain_stops_at_budget_without_reacquiring_guard() {
        let server = MockServer::start().await;
        for (from, to, rev) in [("A", "B", 1), ("B", "C", 2), ("C", "D", 3)] {
            Mock::given(method("GET"))
                .and(path(format!("/enwiki/{from}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(page(Some(rev), Some(to), "")))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/enwiki/D"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(Some(4), None, "")))
            .expect(0)
            .mount(&server)
            .await;

        // A guard of one slot must not deadlock on a longer chain
        let article = fetcher(1, None)
            .fetch(&wikis(&server.uri()), 0, "A", None, 2, None)
            .await
            .unwrap();
        assert_eq!(article.title, "C");
        assert_eq!(article.revision, 3);
    }

    #[tokio::test]
    async fn zero_budget_returns_redirect_page_itself() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enwiki/A"))
            .and(query_param("oldid", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(Some(11), Some("B"), "")))
            .expect(1)
            .mount(&server)
            .await;

        let article = fetcher(5, None)
            .fetch(&wikis(&server.uri()), 0, "A", Some(11), 0, None)
            .await
            .unwrap();
        assert_eq!(article.title, "A");
        assert_eq!(article.revision, 11);
    }

    #[tokio::test]
    async fn missing_revision_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enwiki/Broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(None, None, "<p>x</p>")))
            .mount(&server)
            .await;

        let err = fetcher(5, None)
            .fetch(&wikis(&server.uri()), 0, "Broken", None, 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingRevision { ref wiki, ref title } if wiki == "enwiki" && title == "Broken"));
    }

    #[tokio::test]
    async fn cache_directory_replaces_network() {
        let cache = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(cache.path().join("enwiki/Cached")).unwrap();
        std::fs::write(cache.path().join("enwiki/Cached/77"), page(Some(77), None, "")).unwrap();

        // Nothing listens here; only the cache can answer
        let article = fetcher(5, Some(cache.path().to_path_buf()))
            .fetch(&wikis("http://127.0.0.1:9/"), 0, "Cached", Some(77), 5, None)
            .await
            .unwrap();
        assert_eq!(article.revision, 77);
    }

    #[tokio::test]
    async fn render_wikitext_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/enwiki/MediaWiki:Coll-attribution-page"))
            .and(wiremock::matchers::body_string_contains("wt=%7B%7Bint%3AAnd%7D%7D"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>and</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let html = fetcher(5, None)
            .render_wikitext(&wikis(&server.uri()), 0, "{{int:And}}", ATTRIBUTION_TITLE)
            .await
            .unwrap();
        assert_eq!(html, "<p>and</p>");
    }
}
