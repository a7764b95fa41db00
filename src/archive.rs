//! Bundle packaging
//!
//! Zips a finished output directory into `<output>.tmp`, then replaces the
//! directory with the archive under the original name. Key/value store files
//! can be stored uncompressed so readers can open them inside the archive
//! without extracting.

use crate::error::{Error, Result};
use crate::utils::{remove_path_best_effort, with_suffix};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

/// Zip `dir` into a new archive at `target`
///
/// Entry names are relative to `dir`, `/`-separated and sorted. With
/// `store_db` set, `*.db` files are stored rather than deflated. Returns the
/// number of file entries written.
pub fn zip_directory(dir: &Path, target: &Path, store_db: bool) -> Result<usize> {
    let mut entries = Vec::new();
    collect_entries(dir, dir, &mut entries)?;
    entries.sort();

    let mut writer = ZipWriter::new(BufWriter::new(File::create(target)?));
    let deflated = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let stored = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    let mut files = 0;
    for (name, path, is_dir) in &entries {
        if *is_dir {
            writer.add_directory(name.as_str(), FileOptions::default().unix_permissions(0o755))?;
            continue;
        }
        let options = if store_db && name.ends_with(".db") {
            stored
        } else {
            deflated
        };
        writer.start_file(name.as_str(), options)?;
        let mut source = File::open(path)?;
        std::io::copy(&mut source, &mut writer)?;
        files += 1;
    }

    let mut inner = writer.finish()?;
    std::io::Write::flush(&mut inner)?;
    inner
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;

    tracing::debug!(dir = %dir.display(), target = %target.display(), files, "Wrote archive");
    Ok(files)
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf, bool)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| Error::Other(format!("entry outside bundle directory: {e}")))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type()?.is_dir() {
            out.push((format!("{name}/"), path.clone(), true));
            collect_entries(root, &path, out)?;
        } else {
            out.push((name, path, false));
        }
    }
    Ok(())
}

/// Replace the directory `output` with a zip archive of its contents
///
/// The archive is built next to it as `<output>.tmp` and renamed into place
/// once the directory is gone. The temporary file never survives.
pub async fn package(output: &Path, store_db: bool) -> Result<()> {
    let tmp = with_suffix(output, ".tmp");
    let result = {
        let output = output.to_path_buf();
        let tmp = tmp.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            zip_directory(&output, &tmp, store_db)?;
            std::fs::remove_dir_all(&output)?;
            std::fs::rename(&tmp, &output)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Other(format!("archive task failed: {e}")))
        .and_then(|r| r)
    };

    remove_path_best_effort(&tmp);
    if result.is_ok() {
        tracing::info!(output = %output.display(), "Bundle archived");
    }
    result
}
