use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidParamsError {
    operation: &'static str,
    message: String,
    field: Option<String>,
}

impl InvalidParamsError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

/// Directory traversal failed; the whole walk is discarded.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("root directory {0:?} does not exist")]
    MissingRoot(PathBuf),
    #[error("root {0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("failed to create temp file in {dir:?}: {source}")]
    Scratch {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to save to temp file: {0}")]
    Serialize(String),
    #[error("target {0:?} is read-only")]
    ReadOnlyTarget(PathBuf),
    #[error("failed to move file into place (rename: {rename}, copy: {copy})")]
    Relocate { rename: io::Error, copy: io::Error },
}

/// Failure attributed to a single file. Never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileError {
    #[error("failed to open workbook: {0}")]
    Open(String),
    #[error("save failed: {0}")]
    Save(String),
    #[error("worker failed: {0}")]
    Worker(String),
}

impl FileError {
    pub fn is_save(&self) -> bool {
        matches!(self, FileError::Save(_))
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    InvalidParams(#[from] InvalidParamsError),
    #[error("a batch is already running")]
    Busy,
    #[error("error collecting files: {0}")]
    Collect(#[from] CollectError),
    #[error("failed to save {failed} file(s); first failure: {first_path:?}: {first_message}")]
    SaveFailed {
        failed: usize,
        first_path: PathBuf,
        first_message: String,
    },
    #[error("batch ended with {processed} of {dispatched} files processed")]
    Incomplete { processed: usize, dispatched: usize },
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
