//! Utility functions for file operations and path manipulation

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Longest basename kept as a hint when a legible media name collides
const MAX_NAME_HINT: usize = 128;

/// Make a wiki file title safe and reversible as a file name
///
/// `~` becomes `~~`, and every character outside the printable ASCII ranges
/// `' '..='.'`, `'0'..='['` and `']'..='}'` (which excludes `/`, `\` and `~`)
/// becomes `~<codepoint>~`.
///
/// # Examples
///
/// ```
/// use wiki_bundler::utils::clean_filename;
///
/// assert_eq!(clean_filename("File:Foo bar.jpg"), "File:Foo bar.jpg");
/// assert_eq!(clean_filename("a/b~c"), "a~47~b~~c");
/// assert_eq!(clean_filename("Zürich.png"), "Z~252~rich.png");
/// ```
#[must_use]
pub fn clean_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            ' '..='.' | '0'..='[' | ']'..='}' => out.push(c),
            '~' => out.push_str("~~"),
            other => {
                out.push('~');
                out.push_str(&u32::from(other).to_string());
                out.push('~');
            }
        }
    }
    out
}

/// Extension of a file name including the leading dot, or `""`
#[must_use]
pub fn dotted_extension(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[idx..],
        _ => "",
    }
}

/// Create a new, empty media file in `dir`
///
/// By default the name is random (collision-free by construction) and keeps
/// the extension of `proposed`. With `legible` set, the cleaned form of
/// `proposed` is tried first; if that name cannot be created (taken, or too
/// long) a random name with a truncated basename as prefix is used instead.
///
/// Returns the name relative to `dir` and the open file.
pub fn create_media_file(dir: &Path, proposed: &str, legible: bool) -> io::Result<(String, File)> {
    let ext = dotted_extension(proposed);
    let mut prefix = String::from("tmp-");

    if legible {
        let name = clean_filename(proposed);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&name))
        {
            Ok(file) => return Ok((name, file)),
            Err(e) => {
                tracing::debug!(name = %name, error = %e, "Legible media name unavailable, randomizing");
                let cleaned_ext = dotted_extension(&name);
                let stem = &name[..name.len() - cleaned_ext.len()];
                prefix = stem.chars().take(MAX_NAME_HINT).collect();
            }
        }
    }

    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(ext)
        .tempfile_in(dir)?;
    let (file, path) = temp.keep().map_err(|e| e.error)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::other("temporary file has no name"))?;
    Ok((name, file))
}

/// Flush a file or directory's data and metadata to disk
///
/// Directory syncs are needed because closing a file does not persist the
/// directory entry pointing at it.
pub async fn fsync_path(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fsync_blocking(&path))
        .await
        .map_err(|e| io::Error::other(format!("fsync task failed: {e}")))?
}

fn fsync_blocking(path: &Path) -> io::Result<()> {
    if path.is_dir() && !cfg!(unix) {
        // Directories cannot be opened as files here
        return Ok(());
    }
    File::open(path)?.sync_all()
}

/// Create the output directory, owner-only, failing if it already exists
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Make a finished bundle directory world-readable (mode 0755)
pub fn make_readable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Remove a file or directory tree, logging instead of failing
pub fn remove_path_best_effort(path: &Path) {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove path");
    }
}

/// Sibling of `path` with `suffix` appended to the file name
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
