//! Assertions over finished bundles and the event stream

use std::path::Path;
use tokio::sync::broadcast;
use wiki_bundler::{Event, KvStore};

/// Every path below `dir`, relative and `/`-separated, sorted
pub fn bundle_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    names.sort();
    names
}

/// Files directly inside `dir/images`
pub fn image_files(dir: &Path) -> Vec<String> {
    bundle_listing(&dir.join("images"))
}

/// Number of records in a store of a directory bundle
pub async fn record_count(dir: &Path, store: &str) -> u64 {
    let store = KvStore::open(&dir.join(store))
        .await
        .unwrap_or_else(|e| panic!("cannot open {store}: {e}"));
    let count = store
        .count()
        .await
        .unwrap_or_else(|e| panic!("cannot count records: {e}"));
    store.close().await;
    count
}

/// Events already published on `events`
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Percentages of all status events, in order
pub fn percents(events: &[Event]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Status { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}
