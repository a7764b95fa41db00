//! Core types for wiki-bundler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Default maximum image dimension (pixels) when a wiki does not set one
pub const DEFAULT_IMAGESIZE: u32 = 1200;

/// Orchestrator stage, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Manifest repair and siteinfo
    Configuration,
    /// Rendered articles, legacy HTML and authors
    Content,
    /// Image metadata and bytes
    Media,
    /// Raw wikitext and attribution page
    Wikitext,
    /// Snapshots and archive
    Packaging,
    /// Run finished
    Done,
}

impl Stage {
    /// Stages that carry progress weight (everything but [`Stage::Done`])
    pub const COUNT: usize = 5;

    /// Status line shown when the stage starts
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Configuration => "Fetching wiki configuration",
            Stage::Content => "Fetching parsed articles",
            Stage::Media => "Fetching media",
            Stage::Wikitext => "Fetching wikitext",
            Stage::Packaging => "Creating bundle",
            Stage::Done => "Done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Event emitted during a bundling run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new stage began
    StageStarted {
        /// The stage
        stage: Stage,
        /// Units of work the stage will report
        steps: u64,
    },

    /// Progress update
    Status {
        /// Current stage
        stage: Stage,
        /// Stage-level message
        message: String,
        /// Item being worked on
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        /// Overall progress (0.0 to 100.0)
        percent: f32,
    },

    /// Bundle written
    Done {
        /// Final bundle location
        output: PathBuf,
    },

    /// Run aborted; partial output has been removed
    Failed {
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },
}

/// An image reference discovered in rendered article content
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Wiki that rendered the referencing article
    pub wiki: usize,
    /// Localized file-namespace title (`File:Foo.jpg`)
    pub short: String,
    /// Canonical absolute resource URL; the de-duplication key
    pub resource: String,
    /// Thumbnail URL as used in context
    pub src: String,
    /// Maximum dimension to download
    pub imagesize: u32,
}

/// One `imageinfo` entry as returned by the API
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Direct content URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Description page URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptionurl: Option<String>,
    /// Pixel width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    /// Pixel height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// Size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// MediaWiki media type (`BITMAP`, `DRAWING`, `VIDEO`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediatype: Option<String>,
    /// SHA-1 checksum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    /// Extended metadata (license, artist, credit, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extmetadata: Option<Value>,
}

impl ImageInfo {
    /// Plain value of an `extmetadata` field
    pub fn ext_value(&self, field: &str) -> Option<String> {
        let value = self.extmetadata.as_ref()?.get(field)?.get("value")?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Whether the byte phase should download this media type
    pub fn is_downloadable(&self) -> bool {
        matches!(
            self.mediatype.as_deref(),
            Some("BITMAP") | Some("DRAWING") | Some("VIDEO")
        ) || self.mime.as_deref() == Some("application/pdf")
    }

    /// Vector formats are never replaced by a raster thumbnail
    pub fn is_vector(&self) -> bool {
        self.mediatype.as_deref() == Some("DRAWING")
            || self.mime.as_deref() == Some("application/pdf")
    }

    /// Video files are downloaded as a still thumbnail
    pub fn is_video(&self) -> bool {
        self.mediatype.as_deref() == Some("VIDEO")
    }
}

/// An image after the metadata phase (and possibly the byte phase)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedImage {
    /// The reference as discovered
    pub reference: ImageRef,
    /// File repository serving the image
    pub imagerepository: Option<String>,
    /// Page id of the description page
    pub pageid: Option<u64>,
    /// Missing page or invalid title
    pub missing: bool,
    /// Metadata; empty when missing
    pub info: ImageInfo,
    /// File name inside the media directory; `None` if not downloaded
    pub filename: Option<String>,
}

impl ResolvedImage {
    /// A reference whose metadata could not be found
    pub fn missing(reference: ImageRef) -> Self {
        Self {
            reference,
            imagerepository: None,
            pageid: None,
            missing: true,
            info: ImageInfo::default(),
            filename: None,
        }
    }
}

/// Image metadata record persisted in `imageinfo.db`, keyed by resource URL
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Pixel height
    pub height: Option<u64>,
    /// Pixel width
    pub width: Option<u64>,
    /// Thumbnail URL as used in context
    pub thumburl: String,
    /// Direct content URL
    pub url: Option<String>,
    /// Description page URL
    pub descriptionurl: Option<String>,
    /// SHA-1 checksum
    pub sha1: Option<String>,
    /// Canonical resource URL
    pub resource: String,
    /// Localized file title
    pub short: String,
    /// MIME type
    pub mime: Option<String>,
    /// MediaWiki media type
    pub mediatype: Option<String>,
    /// File name inside `images/`, `null` when absent
    pub filename: Option<String>,
    /// Short license name
    #[serde(default)]
    pub licenseshortname: Option<String>,
    /// Artist credit (may contain HTML)
    #[serde(default)]
    pub artist: Option<String>,
    /// Upload credit (may contain HTML)
    #[serde(default)]
    pub credit: Option<String>,
}

impl From<&ResolvedImage> for ImageMetadata {
    fn from(img: &ResolvedImage) -> Self {
        Self {
            height: img.info.height,
            width: img.info.width,
            thumburl: img.reference.src.clone(),
            url: img.info.url.clone(),
            descriptionurl: img.info.descriptionurl.clone(),
            sha1: img.info.sha1.clone(),
            resource: img.reference.resource.clone(),
            short: img.reference.short.clone(),
            mime: img.info.mime.clone(),
            mediatype: img.info.mediatype.clone(),
            filename: img.filename.clone(),
            licenseshortname: img.info.ext_value("LicenseShortName"),
            artist: img.info.ext_value("Artist"),
            credit: img.info.ext_value("Credit"),
        }
    }
}

/// A wikitext revision snapshot persisted in `revisions.db`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// Wiki index the revision was fetched from
    pub wiki: usize,
    /// Page id
    pub pageid: u64,
    /// Namespace number
    pub ns: i64,
    /// Page title as reported by the wiki
    pub title: String,
    /// Revision id
    pub revid: u64,
    /// Templates were expanded (always 1)
    pub expanded: u8,
    /// Wikitext
    pub content: String,
    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,
}
