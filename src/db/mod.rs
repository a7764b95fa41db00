//! Key/value persistence layer for wiki-bundler
//!
//! Each logical dataset of a bundle (site info, parsed content, image metadata,
//! revisions, authors) lives in its own SQLite file holding a single
//! `kv_table (key TEXT PRIMARY KEY, val TEXT)`. Downstream readers open these
//! files directly, so the schema is part of the bundle format.
//!
//! ## Submodules
//!
//! Methods on [`KvStore`] are organized by concern:
//! - [`lifecycle`] — Opening, table creation and closing
//! - [`records`] — Reads, writes and iteration

use sqlx::sqlite::SqlitePool;
use std::fmt::Display;
use std::path::PathBuf;

mod lifecycle;
mod records;

/// Store file names inside the output directory
pub mod files {
    /// Siteinfo snapshots keyed by wiki base URL
    pub const SITEINFO: &str = "siteinfo.db";
    /// Rendered article HTML keyed by revision
    pub const PARSOID: &str = "parsoid.db";
    /// Legacy parser output (compatibility mode)
    pub const HTML: &str = "html.db";
    /// Image metadata keyed by resource URL
    pub const IMAGEINFO: &str = "imageinfo.db";
    /// Raw wikitext revisions (compatibility mode)
    pub const REVISIONS: &str = "revisions.db";
    /// Contributor lists keyed by title
    pub const AUTHORS: &str = "authors.db";
}

/// Key for a record that belongs to a wiki of a multi-wiki collection
///
/// Revision ids and titles are only unique within one wiki, so every wiki but
/// the first prefixes its keys with `<index>|`.
pub fn wiki_key(wiki: usize, id: impl Display) -> String {
    if wiki == 0 {
        id.to_string()
    } else {
        format!("{wiki}|{id}")
    }
}

/// One key/value store file
#[derive(Debug)]
pub struct KvStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl KvStore {
    /// File backing this store
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
