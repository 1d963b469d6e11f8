use crate::errors::{BatchError, FileError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum::{AsRefStr, Display};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
pub enum ChangeStatus {
    Found,
    Success,
    Failed,
}

/// One matching cell in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub file_path: PathBuf,
    pub sheet_name: String,
    pub cell_address: String,
    pub old_value: String,
    pub new_value: String,
    pub status: ChangeStatus,
    pub message: String,
}

impl ChangeRecord {
    /// Success -> Failed is the only transition a record may take after creation.
    pub fn downgrade(&mut self, message: impl Into<String>) -> bool {
        if self.status != ChangeStatus::Success {
            return false;
        }
        self.status = ChangeStatus::Failed;
        self.message = message.into();
        true
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkResult {
    pub path: PathBuf,
    pub changes: Vec<ChangeRecord>,
    pub error: Option<FileError>,
    pub worker_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed_count: usize,
    pub total_count: usize,
    pub current_path: PathBuf,
    pub per_worker_counts: BTreeMap<usize, usize>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total_count == 0 {
            return 100.0;
        }
        self.processed_count as f64 / self.total_count as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchPhase {
    #[default]
    Idle,
    Scanning,
    Dispatching,
    Draining,
    /// Results are final; the caller is writing the report.
    Reporting,
    Done,
    Failed,
}

impl BatchPhase {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BatchPhase::Scanning
                | BatchPhase::Dispatching
                | BatchPhase::Draining
                | BatchPhase::Reporting
        )
    }
}

/// Read-only view of a batch handed to observers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatus {
    pub phase: BatchPhase,
    pub progress: ProgressSnapshot,
    pub message: String,
    pub total_changes: usize,
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: FileError,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Records with status Found or Success.
    pub total_count: usize,
    pub changes: Vec<ChangeRecord>,
    pub file_failures: Vec<FileFailure>,
}

impl BatchOutcome {
    pub fn save_failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.file_failures.iter().filter(|f| f.error.is_save())
    }

    /// Aggregate error when at least one save failed. The change list stays usable either way.
    pub fn error(&self) -> Option<BatchError> {
        let mut failures = self.save_failures();
        let first = failures.next()?;
        Some(BatchError::SaveFailed {
            failed: 1 + failures.count(),
            first_path: first.path.clone(),
            first_message: first.error.to_string(),
        })
    }
}
