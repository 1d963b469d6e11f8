pub mod batch;
pub mod cli;
pub mod collect;
pub mod config;
pub mod errors;
pub mod locks;
pub mod logging;
pub mod model;
pub mod mutate;
pub mod paths;
pub mod persist;
pub mod report;
pub mod server;
pub mod utils;
pub mod workbook;

pub use batch::{BatchContext, BatchCoordinator, BatchRequest, PendingBatch};
pub use collect::collect_target_files;
pub use config::{CliArgs, ReportEncoding, ReportFormat, SweepConfig};
pub use errors::{BatchError, CollectError, FileError, InvalidParamsError, SaveError};
pub use locks::{LockReleaser, NoopReleaser, TaskkillReleaser, platform_lock_releaser};
pub use model::{
    BatchOutcome, BatchPhase, BatchStatus, ChangeRecord, ChangeStatus, ProgressSnapshot,
    WorkResult,
};
pub use paths::{PathNormalizer, platform_normalizer};
pub use persist::SafeWriter;
pub use report::write_report;
pub use workbook::{SpreadsheetBackend, SpreadsheetHandle, UmyaBackend};
