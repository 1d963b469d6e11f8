//! Write-to-temp-then-relocate persistence for workbooks.
//!
//! The workbook is serialized into a scratch directory with a short path, then moved over the
//! (length-normalized) target in one rename. When the rename cannot be done (different volume),
//! the bytes are copied into place instead. The scratch file is removed on every exit path.

use crate::errors::SaveError;
use crate::paths::PathNormalizer;
use crate::workbook::SpreadsheetHandle;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

const TEMP_PREFIX: &str = "sheet_sweep_";

pub struct SafeWriter {
    scratch_dir: PathBuf,
    normalizer: Arc<dyn PathNormalizer>,
}

impl SafeWriter {
    pub fn new(scratch_dir: impl Into<PathBuf>, normalizer: Arc<dyn PathNormalizer>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            normalizer,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn save(&self, handle: &dyn SpreadsheetHandle, target: &Path) -> Result<(), SaveError> {
        let temp = self.reserve_temp(target)?;

        handle
            .write_to(&temp)
            .map_err(|error| SaveError::Serialize(format!("{error:#}")))?;

        let target = self.normalizer.normalize(target);
        ensure_replaceable(&target)?;

        match temp.persist(&target) {
            Ok(()) => {
                tracing::debug!(target = %target.display(), "relocated workbook into place");
                Ok(())
            }
            Err(err) => {
                let rename = err.error;
                let temp = err.path;
                tracing::debug!(
                    target = %target.display(),
                    error = %rename,
                    "rename failed, falling back to copy"
                );
                let copied = copy_into_place(&temp, &target);
                if let Err(error) = temp.close() {
                    tracing::warn!(error = %error, "failed to remove scratch file");
                }
                copied.map_err(|copy| SaveError::Relocate { rename, copy })
            }
        }
    }

    fn reserve_temp(&self, target: &Path) -> Result<TempPath, SaveError> {
        let suffix = target
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_else(|| ".xlsx".to_string());

        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.scratch_dir)
            .map(|file| file.into_temp_path())
            .map_err(|source| SaveError::Scratch {
                dir: self.scratch_dir.clone(),
                source,
            })
    }
}

/// A read-only target is refused up front: POSIX rename ignores the target's own mode bits, so
/// without this check a file protected by its permissions would still be replaced.
fn ensure_replaceable(target: &Path) -> Result<(), SaveError> {
    match fs::metadata(target) {
        Ok(meta) if meta.permissions().readonly() => {
            Err(SaveError::ReadOnlyTarget(target.to_path_buf()))
        }
        _ => Ok(()),
    }
}

fn copy_into_place(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)?;
    Ok(())
}
