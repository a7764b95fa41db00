//! Configuration types for wiki-bundler

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Output location and bundle format
///
/// Used as a nested sub-config within [`BundleConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path of the finished bundle (directory or zip archive)
    pub output: PathBuf,

    /// Leave the bundle as a plain directory instead of zipping it
    #[serde(default)]
    pub nozip: bool,

    /// Store `*.db` files uncompressed inside the archive so they can be
    /// opened in place
    #[serde(default)]
    pub store_db: bool,

    /// Emit the legacy layout (html.db, revisions-1.txt, siteinfo.json,
    /// nfo.json, attribution page) for older downstream consumers
    #[serde(default)]
    pub compat: bool,

    /// Name media files after their wiki titles instead of random names
    #[serde(default)]
    pub compat_filenames: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("bundle.zip"),
            nozip: false,
            store_db: false,
            compat: false,
            compat_filenames: false,
        }
    }
}

/// Table of contents handling for the collection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TocMode {
    /// Leave whatever the manifest says
    #[default]
    Auto,
    /// Force a table of contents
    Yes,
    /// Suppress the table of contents
    No,
}

impl FromStr for TocMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TocMode::Auto),
            "no" | "false" | "off" => Ok(TocMode::No),
            _ => Ok(TocMode::Yes),
        }
    }
}

/// Remote services, request-class concurrency limits and manifest overrides
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Follow rendering-service redirects (default: true)
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    /// Redirect hops followed per article when enabled (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Concurrent rendering-service requests (default: 5)
    #[serde(default = "default_limit")]
    pub article_limit: usize,

    /// Concurrent image requests, per phase (default: 5)
    #[serde(default = "default_limit")]
    pub image_limit: usize,

    /// Concurrent wikitext revision requests (default: 5)
    #[serde(default = "default_limit")]
    pub revision_limit: usize,

    /// Concurrent contributor requests (default: 5)
    #[serde(default = "default_limit")]
    pub author_limit: usize,

    /// Concurrent siteinfo requests (default: 5)
    #[serde(default = "default_limit")]
    pub siteinfo_limit: usize,

    /// Concurrent legacy parser requests (default: 5)
    #[serde(default = "default_limit")]
    pub legacy_html_limit: usize,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Rendering service base URL filled into wikis that lack one
    #[serde(default)]
    pub render_service: Option<String>,

    /// Replace every wiki's maximum image dimension
    #[serde(default)]
    pub image_size: Option<u32>,

    /// Collection language; wins over the manifest and siteinfo
    #[serde(default)]
    pub lang: Option<String>,

    /// Table of contents override
    #[serde(default)]
    pub toc: TocMode,

    /// Look-aside directory of pre-rendered articles (`<prefix>/<title>[/<revid>]`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Seed wiki whose interwiki map resolves prefixes in
    /// [`Manifest::from_articles`](crate::manifest::Manifest::from_articles)
    #[serde(default = "default_seed_wiki")]
    pub seed_wiki: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            max_redirects: default_max_redirects(),
            article_limit: default_limit(),
            image_limit: default_limit(),
            revision_limit: default_limit(),
            author_limit: default_limit(),
            siteinfo_limit: default_limit(),
            legacy_html_limit: default_limit(),
            user_agent: default_user_agent(),
            render_service: None,
            image_size: None,
            lang: None,
            toc: TocMode::Auto,
            cache_dir: None,
            seed_wiki: default_seed_wiki(),
        }
    }
}

impl FetchConfig {
    /// Redirect budget handed to the article fetcher
    pub fn redirect_budget(&self) -> usize {
        if self.follow_redirects {
            self.max_redirects
        } else {
            0
        }
    }
}

/// Retry configuration for network requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout of the first attempt, doubled on every retry (default: 60 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout: default_timeout(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for a bundling run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Output location and format
    #[serde(default)]
    pub output: OutputConfig,

    /// Remote services and concurrency limits
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Network retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Whole-download retries for an image whose bytes arrive truncated (default: 5)
    #[serde(default = "default_image_retries")]
    pub image_retries: u32,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            image_retries: default_image_retries(),
        }
    }
}

impl BundleConfig {
    /// Create a configuration writing to `output` with every other setting defaulted
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: OutputConfig {
                output: output.into(),
                ..OutputConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject settings that would stall or misdirect a run
    pub fn validate(&self) -> Result<()> {
        if self.output.output.as_os_str().is_empty() {
            return Err(Error::config("output.output", "output path must not be empty"));
        }

        let limits = [
            ("fetch.article_limit", self.fetch.article_limit),
            ("fetch.image_limit", self.fetch.image_limit),
            ("fetch.revision_limit", self.fetch.revision_limit),
            ("fetch.author_limit", self.fetch.author_limit),
            ("fetch.siteinfo_limit", self.fetch.siteinfo_limit),
            ("fetch.legacy_html_limit", self.fetch.legacy_html_limit),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(Error::config(key, "concurrency limit must be at least 1"));
            }
        }

        if self.retry.timeout.is_zero() {
            return Err(Error::config("retry.timeout", "timeout must be non-zero"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        if let Some(0) = self.fetch.image_size {
            return Err(Error::config("fetch.image_size", "image size must be positive"));
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_redirects() -> usize {
    5
}

fn default_limit() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("wiki-bundler/{}", env!("CARGO_PKG_VERSION"))
}

fn default_seed_wiki() -> String {
    "http://en.wikipedia.org/w".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_image_retries() -> u32 {
    5
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let config: BundleConfig =
            serde_json::from_str(r#"{"output": {"output": "/tmp/book.zip"}}"#).unwrap();

        assert_eq!(config.output.output, PathBuf::from("/tmp/book.zip"));
        assert!(!config.output.nozip);
        assert!(config.fetch.follow_redirects);
        assert_eq!(config.fetch.max_redirects, 5);
        assert_eq!(config.fetch.article_limit, 5);
        assert_eq!(config.fetch.image_limit, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.timeout, Duration::from_secs(60));
        assert_eq!(config.image_retries, 5);
        assert_eq!(config.fetch.toc, TocMode::Auto);
        config.validate().unwrap();
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = BundleConfig::new("/tmp/x");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["retry"]["timeout"], 60);
        assert_eq!(json["retry"]["initial_delay"], 1);
    }

    #[test]
    fn toc_mode_parses_like_a_flag() {
        assert_eq!("auto".parse::<TocMode>().unwrap(), TocMode::Auto);
        assert_eq!("OFF".parse::<TocMode>().unwrap(), TocMode::No);
        assert_eq!("false".parse::<TocMode>().unwrap(), TocMode::No);
        assert_eq!("no".parse::<TocMode>().unwrap(), TocMode::No);
        assert_eq!("yes".parse::<TocMode>().unwrap(), TocMode::Yes);
        assert_eq!("1".parse::<TocMode>().unwrap(), TocMode::Yes);
    }

    #[test]
    fn redirect_budget_respects_follow_flag() {
        let mut fetch = FetchConfig::default();
        assert_eq!(fetch.redirect_budget(), 5);
        fetch.follow_redirects = false;
        assert_eq!(fetch.redirect_budget(), 0);
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = BundleConfig::new("/tmp/x");
        config.fetch.image_limit = 0;
        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("fetch.image_limit")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_output() {
        let config = BundleConfig::new("");
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }
}
