#![allow(dead_code)]
pub mod fake;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sheet_sweep::paths::{PathNormalizer, platform_normalizer};
use sheet_sweep::workbook::SpreadsheetBackend;
use sheet_sweep::{BatchCoordinator, BatchRequest, SafeWriter, SweepConfig, UmyaBackend};
use tempfile::{TempDir, tempdir};
use umya_spreadsheet::{self, Spreadsheet};

pub fn write_workbook_to_path<F>(path: &Path, f: F)
where
    F: FnOnce(&mut Spreadsheet),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    let mut book = umya_spreadsheet::new_file();
    f(&mut book);
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write workbook");
}

/// Set text cells on the default sheet, e.g. `&[("A1", "OldValue")]`.
pub fn fill_text(book: &mut Spreadsheet, cells: &[(&str, &str)]) {
    let sheet = book
        .get_sheet_by_name_mut("Sheet1")
        .expect("default sheet exists");
    for (address, value) in cells {
        sheet.get_cell_mut(*address).set_value_string(value.to_string());
    }
}

pub fn read_cell(path: &Path, sheet: &str, address: &str) -> String {
    let book = umya_spreadsheet::reader::xlsx::read(path).expect("read workbook");
    book.get_sheet_by_name(sheet)
        .expect("sheet exists")
        .get_cell(address)
        .map(|cell| cell.get_value().to_string())
        .unwrap_or_default()
}

/// (bold, font argb) of a cell.
pub fn read_font(path: &Path, sheet: &str, address: &str) -> (bool, String) {
    let book = umya_spreadsheet::reader::xlsx::read(path).expect("read workbook");
    let cell = book
        .get_sheet_by_name(sheet)
        .expect("sheet exists")
        .get_cell(address)
        .expect("cell exists");
    let font = cell.get_style().get_font().expect("font present");
    (*font.get_bold(), font.get_color().get_argb().to_string())
}

pub struct TestWorkspace {
    _tempdir: TempDir,
    _scratch: TempDir,
    root: PathBuf,
    scratch: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let workdir = tempdir().expect("tempdir");
        let scratch = tempdir().expect("scratch tempdir");
        let root = workdir.path().to_path_buf();
        let scratch_path = scratch.path().to_path_buf();
        Self {
            _tempdir: workdir,
            _scratch: scratch,
            root,
            scratch: scratch_path,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn create_workbook<F>(&self, name: &str, f: F) -> PathBuf
    where
        F: FnOnce(&mut Spreadsheet),
    {
        let path = self.path(name);
        write_workbook_to_path(&path, f);
        path
    }

    pub fn create_text_workbook(&self, name: &str, cells: &[(&str, &str)]) -> PathBuf {
        self.create_workbook(name, |book| fill_text(book, cells))
    }

    /// Placeholder file for fake-backend runs; contents are never parsed.
    pub fn touch(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dir");
        }
        std::fs::write(&path, b"placeholder").expect("write placeholder");
        path
    }

    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(&self.scratch)
            .expect("read scratch")
            .count()
    }

    pub fn config(&self) -> SweepConfig {
        SweepConfig {
            root: self.root.clone(),
            scratch_dir: self.scratch.clone(),
            lock_release: false,
            ..SweepConfig::default()
        }
    }

    pub fn request(&self, search: &str, replace: &str, search_only: bool) -> BatchRequest {
        BatchRequest::from_config(&self.config(), search, replace, search_only)
    }

    pub fn coordinator(&self, workers: usize) -> BatchCoordinator {
        self.coordinator_with(Arc::new(UmyaBackend), workers)
    }

    pub fn coordinator_with(
        &self,
        backend: Arc<dyn SpreadsheetBackend>,
        workers: usize,
    ) -> BatchCoordinator {
        let normalizer: Arc<dyn PathNormalizer> = platform_normalizer();
        let writer = Arc::new(SafeWriter::new(&self.scratch, normalizer.clone()));
        BatchCoordinator::new(backend, writer, normalizer, self.config().extensions)
            .with_workers(workers)
    }
}

pub fn set_read_only(path: &Path) {
    let mut perms = std::fs::metadata(path).expect("metadata").permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms).expect("set read-only");
}
