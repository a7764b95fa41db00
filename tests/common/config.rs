//! Test configuration helpers pointing a bundler at a mock wiki

use super::mock_wiki::MockWiki;
use std::path::Path;
use std::time::Duration;
use wiki_bundler::{BundleConfig, Bundler, RetryConfig};

/// Retry settings that fail fast: no request-level retries, tiny delays
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        timeout: Duration::from_secs(10),
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
        ..RetryConfig::default()
    }
}

/// Configuration writing a plain directory bundle to `output`, rendering
/// through the mock wiki
pub fn test_config(wiki: &MockWiki, output: &Path) -> BundleConfig {
    let mut config = BundleConfig::new(output);
    config.fetch.render_service = Some(wiki.render_service());
    config.fetch.seed_wiki = wiki.baseurl();
    config.output.nozip = true;
    config.retry = fast_retry();
    config
}

/// Bundler built from [`test_config`]
pub fn test_bundler(wiki: &MockWiki, output: &Path) -> Bundler {
    match Bundler::new(test_config(wiki, output)) {
        Ok(bundler) => bundler,
        Err(e) => panic!("test configuration rejected: {e}"),
    }
}
