//! Manifest tree describing a bundle
//!
//! A manifest (the `metabook.json` of a bundle) is a `collection` root holding
//! an ordered tree of `chapter` and `article` nodes, plus the list of wikis the
//! articles come from. Unknown fields are carried through untouched so that a
//! repaired manifest round-trips everything the caller supplied.
//!
//! Traversal is iterative: [`Manifest::walk`] flattens the tree into a
//! depth-first worklist, and [`Manifest::articles_mut`] yields the article
//! nodes in the same order, so fetch results can be written back by position.

use crate::error::{Error, Result};
use crate::types::DEFAULT_IMAGESIZE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Base URL of the shared media repository wiki
pub const COMMONS_BASEURL: &str = "http://commons.wikimedia.org/w";

/// Prefix of the shared media repository wiki
pub const COMMONS_PREFIX: &str = "commonswiki";

/// Tag of the manifest root
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    /// The only root kind
    #[default]
    #[serde(rename = "collection")]
    Collection,
}

/// Root of a manifest
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Always `collection`
    #[serde(rename = "type", default)]
    pub kind: CollectionKind,
    /// Collection title
    #[serde(default)]
    pub title: String,
    /// Collection subtitle
    #[serde(default)]
    pub subtitle: String,
    /// Free-form summary
    #[serde(default)]
    pub summary: String,
    /// Manifest format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Top-level chapters and articles
    #[serde(default)]
    pub items: Vec<Node>,
    /// License descriptors
    #[serde(default = "default_licenses")]
    pub licenses: Vec<Value>,
    /// Wikis referenced by index from articles and file repositories
    #[serde(default)]
    pub wikis: Vec<WikiConfig>,
    /// Display language of the collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Whether to render a table of contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc: Option<bool>,
    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            kind: CollectionKind::Collection,
            title: String::new(),
            subtitle: String::new(),
            summary: String::new(),
            version: default_version(),
            items: Vec::new(),
            licenses: default_licenses(),
            wikis: Vec::new(),
            lang: None,
            toc: None,
            extra: Map::new(),
        }
    }
}

/// A node below the collection root
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Titled group of nodes
    Chapter(Chapter),
    /// Leaf article
    Article(Article),
}

/// A chapter node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter title
    #[serde(default)]
    pub title: String,
    /// Nested nodes
    #[serde(default)]
    pub items: Vec<Node>,
    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An article node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Page title
    pub title: String,
    /// Index into [`Manifest::wikis`]
    #[serde(default)]
    pub wiki: usize,
    /// Revision to fetch; set to the resolved revision after the content stage
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_revision",
        deserialize_with = "deserialize_revision"
    )]
    pub revision: Option<u64>,
    /// RDF subject of the rendered revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    /// Canonical page URL the revision is a version of
    #[serde(
        default,
        rename = "isVersionOf",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_version_of: Option<String>,
    /// Fields this crate does not interpret (`content_type`, `url`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Article {
    /// Article with just a title, on wiki 0
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Configuration of one wiki
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Script path; the action API is `<baseurl>/api.php`
    pub baseurl: String,
    /// Maximum image dimension in pixels
    #[serde(default = "default_imagesize")]
    pub imagesize: u32,
    /// Rendering service base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsoid: Option<String>,
    /// Site id used as the rendering-service path prefix (`enwiki`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// File repositories serving this wiki's media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filerepos: Option<Vec<FileRepo>>,
    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WikiConfig {
    /// A wiki config with the legacy default fields
    pub fn new(baseurl: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("type".into(), json!("wikiconf"));
        extra.insert("keep_tmpfiles".into(), json!(false));
        extra.insert("script_extension".into(), json!(".php"));
        extra.insert("format".into(), json!("nuwiki"));
        Self {
            baseurl: baseurl.into(),
            imagesize: DEFAULT_IMAGESIZE,
            parsoid: None,
            prefix: None,
            filerepos: None,
            extra,
        }
    }

    /// The shared media repository wiki
    pub fn commons() -> Self {
        Self {
            prefix: Some(COMMONS_PREFIX.to_string()),
            ..Self::new(COMMONS_BASEURL)
        }
    }

    /// Site prefix, or the base URL when it is not known yet
    pub fn label(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.baseurl)
    }
}

/// A file repository descriptor (`meta=filerepoinfo`)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRepo {
    /// Repository name (`local`, `shared`, ...)
    pub name: String,
    /// Repository belongs to the wiki itself
    #[serde(default, deserialize_with = "deserialize_presence")]
    pub local: bool,
    /// Script path of the wiki serving a shared repository
    #[serde(
        default,
        rename = "scriptDirUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub script_dir_url: Option<String>,
    /// Index into [`Manifest::wikis`] of the wiki serving this repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki: Option<usize>,
    /// Fields this crate does not interpret (`displayname`, `rootUrl`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind of grouping node in a worklist
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    /// The root
    Collection,
    /// A chapter
    Chapter,
}

impl GroupKind {
    /// Manifest tag of the node
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Collection => "collection",
            GroupKind::Chapter => "chapter",
        }
    }
}

/// One article to fetch, detached from the tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArticleTask {
    /// Position among the articles in depth-first order
    pub ordinal: usize,
    /// Wiki index
    pub wiki: usize,
    /// Page title
    pub title: String,
    /// Requested revision
    pub revision: Option<u64>,
}

/// A step of the depth-first worklist
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Visit {
    /// Collection or chapter
    Group {
        /// Which kind
        kind: GroupKind,
        /// Its title
        title: String,
    },
    /// An article
    Article(ArticleTask),
}

impl Manifest {
    /// Flatten the tree into depth-first order, root first
    pub fn walk(&self) -> Vec<Visit> {
        let mut out = vec![Visit::Group {
            kind: GroupKind::Collection,
            title: self.title.clone(),
        }];
        let mut ordinal = 0;
        let mut stack = vec![self.items.iter()];
        while let Some(level) = stack.last_mut() {
            match level.next() {
                Some(Node::Article(a)) => {
                    out.push(Visit::Article(ArticleTask {
                        ordinal,
                        wiki: a.wiki,
                        title: a.title.clone(),
                        revision: a.revision,
                    }));
                    ordinal += 1;
                }
                Some(Node::Chapter(c)) => {
                    out.push(Visit::Group {
                        kind: GroupKind::Chapter,
                        title: c.title.clone(),
                    });
                    stack.push(c.items.iter());
                }
                None => {
                    stack.pop();
                }
            }
        }
        out
    }

    /// Number of nodes including the root
    pub fn count_items(&self) -> usize {
        self.walk().len()
    }

    /// Article nodes in depth-first order
    pub fn articles(&self) -> Vec<&Article> {
        let mut out = Vec::new();
        let mut stack = vec![self.items.iter()];
        while let Some(level) = stack.last_mut() {
            match level.next() {
                Some(Node::Article(a)) => out.push(a),
                Some(Node::Chapter(c)) => stack.push(c.items.iter()),
                None => {
                    stack.pop();
                }
            }
        }
        out
    }

    /// Mutable article nodes in depth-first order
    pub fn articles_mut(&mut self) -> Vec<&mut Article> {
        let mut out = Vec::new();
        let mut stack = vec![self.items.iter_mut()];
        while let Some(level) = stack.last_mut() {
            match level.next() {
                Some(Node::Article(a)) => out.push(a),
                Some(Node::Chapter(c)) => stack.push(c.items.iter_mut()),
                None => {
                    stack.pop();
                }
            }
        }
        out
    }

    /// Wiki config by index
    pub fn wiki(&self, idx: usize) -> Result<&WikiConfig> {
        self.wikis.get(idx).ok_or_else(|| Error::Config {
            message: format!("wiki index {idx} out of range ({} wikis)", self.wikis.len()),
            key: Some("wikis".to_string()),
        })
    }

    /// Check that every article and file repository points at a listed wiki
    pub fn check_references(&self) -> Result<()> {
        if self.wikis.is_empty() {
            return Err(Error::config("wikis", "manifest lists no wikis"));
        }
        for article in self.articles() {
            self.wiki(article.wiki)?;
        }
        for w in &self.wikis {
            for repo in w.filerepos.iter().flatten() {
                if let Some(idx) = repo.wiki {
                    self.wiki(idx)?;
                }
            }
        }
        Ok(())
    }

    /// Build a manifest from `(prefix, title)` pairs
    ///
    /// Each prefix is looked up in `interwikimap` (the `interwikimap` siteinfo
    /// property of a seed wiki) as either `prefix` or `prefix` + `wiki`. The
    /// interwiki URL must end in `/wiki/$1`; the API base URL is derived by
    /// cutting `iki/$1` from it (`https://fr.wikipedia.org/wiki/$1` gives
    /// `https://fr.wikipedia.org/w`). Underscores in titles become spaces.
    pub fn from_articles(
        articles: &[(String, String)],
        interwikimap: &Value,
        render_service: Option<&str>,
    ) -> Result<Manifest> {
        let entries = interwikimap.as_array().map(Vec::as_slice).unwrap_or(&[]);
        let mut manifest = Manifest::default();
        let mut known: Vec<(String, String)> = Vec::new(); // (prefix, title url)

        for (prefix, title) in articles {
            let wiki = match known.iter().position(|(p, _)| p == prefix) {
                Some(idx) => idx,
                None => {
                    let title_url = lookup_interwiki(entries, prefix)?;
                    let baseurl = title_url
                        .strip_suffix("iki/$1")
                        .map(str::to_string)
                        .ok_or_else(|| {
                            Error::PrefixResolution(format!("can't make API url from: {title_url}"))
                        })?;
                    let mut w = WikiConfig::new(baseurl);
                    w.parsoid = render_service.map(str::to_string);
                    w.prefix = Some(prefix.clone());
                    manifest.wikis.push(w);
                    known.push((prefix.clone(), title_url));
                    known.len() - 1
                }
            };

            let mut article = Article::new(title.replace('_', " "));
            article.wiki = wiki;
            article
                .extra
                .insert("content_type".into(), json!("text/x-wiki"));
            article
                .extra
                .insert("url".into(), json!(known[wiki].1.replacen("$1", title, 1)));
            manifest.items.push(Node::Article(article));
        }

        Ok(manifest)
    }
}

fn lookup_interwiki(entries: &[Value], prefix: &str) -> Result<String> {
    let found = entries.iter().rev().find(|entry| {
        entry
            .get("prefix")
            .and_then(Value::as_str)
            .is_some_and(|p| p == prefix || format!("{p}wiki") == prefix)
    });
    let url = found
        .and_then(|entry| entry.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::PrefixResolution(format!("prefix not found: {prefix}")))?;
    if !url.ends_with("/wiki/$1") {
        return Err(Error::PrefixResolution(format!(
            "can't make API url from: {url}"
        )));
    }
    Ok(url.to_string())
}

fn default_version() -> u32 {
    1
}

fn default_imagesize() -> u32 {
    DEFAULT_IMAGESIZE
}

fn default_licenses() -> Vec<Value> {
    vec![json!({
        "mw_rights_icon": "",
        "mw_rights_page": "",
        "mw_rights_text": "",
        "mw_rights_url": "",
        "name": "License",
        "type": "license"
    })]
}

/// Revisions are written as strings; numbers and strings are both accepted
fn serialize_revision<S: Serializer>(rev: &Option<u64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match rev {
        Some(rev) => serializer.serialize_str(&rev.to_string()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_revision<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(0)) => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid revision id: {s:?}"))),
    }
}

/// The API marks boolean flags by their presence (`"local": ""`)
fn deserialize_presence<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => false,
        _ => true,
    })
}
