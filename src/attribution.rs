//! Attribution page (compatibility mode)
//!
//! Synthesizes a wikitext document crediting every article's contributors,
//! every image's license and artist, and each wiki's content license, then
//! renders it through the rendering service so the interface messages it
//! uses are localized. The messages come from the wiki's Collection
//! extension:
//!
//! - `Coll-attribution-page`: `$1` articles, `$2` images, `$3` licenses
//! - `Coll-article-attribution`: `$1` title, `$2` URL, `$3` authors
//! - `Coll-image-attribution`: `$1` file, `$2` URL, `$3` license, `$4` credit,
//!   `$5` artist
//! - `Coll-attribution-anons`: `$1` number of anonymous contributors
//!
//! plus the core `And`, `Word-separator` and `Comma-separator` messages.

use crate::authors::ANON_SENTINEL;
use crate::db::{KvStore, wiki_key};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::progress::ProgressReporter;
use crate::render::{ATTRIBUTION_TITLE, ArticleFetcher};
use crate::siteinfo::Siteinfo;
use crate::types::ImageMetadata;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// Rendered attribution page and its source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributionPage {
    /// Wikitext submitted for rendering
    pub wikitext: String,
    /// Rendered HTML
    pub html: String,
}

fn anchor_pattern() -> Option<&'static Regex> {
    static ANCHOR: OnceLock<Option<Regex>> = OnceLock::new();
    ANCHOR
        .get_or_init(|| Regex::new(r#"(?is)^(.*)<a [^>]*href=['"]([^'"]*)['"][^>]*>([^<]*)</a>(.*)$"#).ok())
        .as_ref()
}

/// Make a metadata string safe as a template argument
///
/// A whole template invocation passes through (an empty one becomes `""`),
/// HTML links become external wikitext links, and pipes become `&#124;`.
pub fn mangle(s: &str) -> String {
    if let Some(inner) = s.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
        return if inner.trim().is_empty() {
            String::new()
        } else {
            s.to_string()
        };
    }
    if let Some(caps) = anchor_pattern().and_then(|re| re.captures(s)) {
        let part = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        return format!(
            "{}[{} {}]{}",
            mangle(part(1)),
            part(2),
            mangle(part(3)),
            mangle(part(4))
        );
    }
    s.replace('|', "&#124;")
}

/// Join items into a localizable "a, b and c" list
pub fn listafy(items: &[String]) -> String {
    const AND: &str = "{{int:And}}{{int:Word-separator}}";
    const COMMA: &str = "{{int:Comma-separator}}";

    let Some((last, rest)) = items.split_last() else {
        return String::new();
    };
    let mut out = String::new();
    for (i, item) in rest.iter().enumerate() {
        out.push_str(&mangle(item));
        out.push_str(if i + 1 == rest.len() { AND } else { COMMA });
    }
    out.push_str(&mangle(last));
    out
}

/// Replace an `ANONIPEDITS:<n>` sentinel with its message
fn localize_author(author: &str) -> String {
    match author.strip_prefix(ANON_SENTINEL) {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{{{{int:Coll-attribution-anons|{n}}}}}")
        }
        _ => author.to_string(),
    }
}

/// `Coll-article-attribution` line of one article
pub fn article_line(title: &str, url: &str, authors: &[String]) -> String {
    let authors: Vec<String> = authors.iter().map(|a| localize_author(a)).collect();
    format!(
        "{{{{int:Coll-article-attribution|{}|{}|{}}}}}",
        mangle(title),
        mangle(url),
        listafy(&authors)
    )
}

/// `Coll-image-attribution` line of one image
pub fn image_line(meta: &ImageMetadata) -> String {
    let or_unknown = |v: &Option<String>| mangle(v.as_deref().filter(|s| !s.is_empty()).unwrap_or("?"));
    format!(
        "{{{{int:Coll-image-attribution|{}|{}|{}|{}|{}}}}}",
        mangle(&meta.short),
        mangle(meta.url.as_deref().unwrap_or_default()),
        or_unknown(&meta.licenseshortname),
        or_unknown(&meta.credit),
        or_unknown(&meta.artist)
    )
}

/// License line of one wiki
pub fn rights_line(siteinfo: &Siteinfo) -> String {
    let (url, text) = siteinfo.rights();
    let text = mangle(text.unwrap_or_default());
    match url.filter(|u| !u.is_empty()) {
        Some(url) => {
            let encoded = url::Url::parse(url).map_or_else(|_| url.to_string(), String::from);
            format!("[{encoded} {text}]")
        }
        None => text,
    }
}

/// Wrap the three lists into the page message
pub fn page_wikitext(pages: &[String], images: &[String], rights: &[String]) -> String {
    let list = |items: &[String]| {
        let mut out = String::from("<ul>\n");
        for item in items {
            out.push_str("<li>");
            out.push_str(item);
            out.push_str("</li>\n");
        }
        out.push_str("</ul>\n");
        out
    };
    format!(
        "{{{{int:Coll-attribution-page|{}|{}|{}}}}}",
        list(pages),
        list(images),
        list(rights)
    )
}

/// Index of the wiki whose language matches `lang`, else 0
pub fn rendering_wiki(siteinfos: &[Arc<Siteinfo>], lang: &str) -> usize {
    siteinfos
        .iter()
        .position(|info| info.lang().unwrap_or("en") == lang)
        .unwrap_or_else(|| {
            tracing::warn!(lang, "No wiki matches the collection language, using the first wiki");
            0
        })
}

/// Build and render the attribution page
///
/// Reports three progress steps: article contributors, image contributors,
/// and the render itself.
pub async fn create(
    manifest: &Manifest,
    authors: &KvStore,
    images: &KvStore,
    siteinfos: &[Arc<Siteinfo>],
    renderer: &ArticleFetcher,
    progress: &ProgressReporter,
) -> Result<AttributionPage> {
    progress.report("article contributors");
    let mut pages = Vec::new();
    for article in manifest.articles() {
        let names: Vec<String> = authors
            .get(&wiki_key(article.wiki, &article.title))
            .await?
            .unwrap_or_default();
        let revision = article.revision.map(|r| r.to_string()).unwrap_or_default();
        let url = match &article.is_version_of {
            Some(canonical) => format!("{canonical}?oldid={revision}"),
            None => {
                let baseurl = manifest.wiki(article.wiki)?.baseurl.trim_end_matches('/');
                format!(
                    "{baseurl}/index.php?title={}&oldid={revision}",
                    urlencoding::encode(&article.title.replace(' ', "_"))
                )
            }
        };
        pages.push(article_line(&article.title, &url, &names));
    }

    progress.report("image contributors");
    let mut image_lines = Vec::new();
    images
        .for_each(|_key, meta: ImageMetadata| image_lines.push(image_line(&meta)))
        .await?;
    image_lines.sort();

    let mut seen = HashSet::new();
    let rights: Vec<String> = siteinfos
        .iter()
        .map(|info| rights_line(info))
        .filter(|line| seen.insert(line.clone()))
        .collect();

    let wikitext = page_wikitext(&pages, &image_lines, &rights);
    let wiki = rendering_wiki(siteinfos, manifest.lang.as_deref().unwrap_or("en"));

    progress.report("attribution page");
    let html = renderer
        .render_wikitext(&manifest.wikis, wiki, &wikitext, ATTRIBUTION_TITLE)
        .await?;
    Ok(AttributionPage { wikitext, html })
}
