use crate::errors::CollectError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Base-name prefix the desktop application uses for its owner/lock files.
pub const LOCK_FILE_PREFIX: &str = "~$";

/// Absolute paths of every workbook under `root`, in traversal order.
///
/// `extensions` and `excluded_exts` are expected lowercase without a leading dot
/// (see [`crate::utils::normalize_extensions`]). `excluded_dir` is pruned, never descended.
/// Any traversal error discards everything collected so far.
pub fn collect_target_files(
    root: &Path,
    extensions: &[String],
    excluded_exts: &[String],
    excluded_dir: Option<&Path>,
) -> Result<Vec<PathBuf>, CollectError> {
    let root = absolute(root);
    if !root.exists() {
        return Err(CollectError::MissingRoot(root));
    }
    if !root.is_dir() {
        return Err(CollectError::NotADirectory(root));
    }
    let excluded_dir = excluded_dir.map(absolute);

    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match excluded_dir.as_deref() {
            Some(excluded) => !(entry.file_type().is_dir() && entry.path() == excluded),
            None => true,
        });

    let mut out = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| CollectError::Walk {
            path: source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.clone()),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_lock_file(path) {
            tracing::debug!(path = %path.display(), "skipping lock file");
            continue;
        }
        let Some(ext) = lowercase_extension(path) else {
            continue;
        };
        if !extensions.contains(&ext) || excluded_exts.contains(&ext) {
            continue;
        }
        out.push(path.to_path_buf());
    }

    tracing::info!(root = %root.display(), files = out.len(), "collected workbooks");
    Ok(out)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with(LOCK_FILE_PREFIX))
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}
