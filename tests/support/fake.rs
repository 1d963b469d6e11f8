//! In-memory spreadsheet backend with injectable failures.

use anyhow::{Result, bail};
use parking_lot::Mutex;
use sheet_sweep::workbook::{CellText, HighlightStyle, SpreadsheetBackend, SpreadsheetHandle};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Sheets = BTreeMap<String, BTreeMap<(u32, u32), String>>;

#[derive(Default)]
struct Shared {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    saves: Mutex<HashMap<PathBuf, usize>>,
    opens: Mutex<HashMap<PathBuf, usize>>,
}

/// Every opened file gets the same layout.
///
/// File names containing `corrupt` fail to open; names containing `panic` panic inside `open`.
pub struct FakeBackend {
    default_layout: Sheets,
    formulas: HashSet<(String, u32, u32)>,
    rejected: HashSet<(String, u32, u32)>,
    delay: Option<Duration>,
    shared: Arc<Shared>,
}

impl FakeBackend {
    /// One sheet `Sheet1` with the given (row, col, text) cells.
    pub fn with_cells(cells: &[(u32, u32, &str)]) -> Self {
        Self {
            default_layout: layout("Sheet1", cells),
            formulas: HashSet::new(),
            rejected: HashSet::new(),
            delay: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Mark a `Sheet1` cell as holding a formula whose cached result is its text.
    pub fn with_formula_cell(mut self, row: u32, col: u32) -> Self {
        self.formulas.insert(("Sheet1".to_string(), row, col));
        self
    }

    pub fn with_extra_sheet(mut self, sheet: &str, cells: &[(u32, u32, &str)]) -> Self {
        let extra = layout(sheet, cells);
        self.default_layout.extend(extra);
        self
    }

    pub fn reject_cell(mut self, sheet: &str, row: u32, col: u32) -> Self {
        self.rejected.insert((sheet.to_string(), row, col));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn saves_of(&self, path: &Path) -> usize {
        self.shared.saves.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_saves(&self) -> usize {
        self.shared.saves.lock().values().sum()
    }

    pub fn opens_of(&self, path: &Path) -> usize {
        self.shared.opens.lock().get(path).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }
}

fn layout(sheet: &str, cells: &[(u32, u32, &str)]) -> Sheets {
    let mut sheets = Sheets::new();
    let entry = sheets.entry(sheet.to_string()).or_default();
    for (row, col, text) in cells {
        entry.insert((*row, *col), text.to_string());
    }
    sheets
}

impl SpreadsheetBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn SpreadsheetHandle>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        *self.shared.opens.lock().entry(path.to_path_buf()).or_default() += 1;

        if name.contains("panic") {
            panic!("backend exploded on {name}");
        }
        if name.contains("corrupt") {
            bail!("zip archive is invalid: {name}");
        }

        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        Ok(Box::new(FakeHandle {
            origin: path.to_path_buf(),
            sheets: self.default_layout.clone(),
            formulas: self.formulas.clone(),
            rejected: self.rejected.clone(),
            styled: HashSet::new(),
            shared: self.shared.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub struct FakeHandle {
    origin: PathBuf,
    sheets: Sheets,
    formulas: HashSet<(String, u32, u32)>,
    rejected: HashSet<(String, u32, u32)>,
    styled: HashSet<(String, u32, u32)>,
    shared: Arc<Shared>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SpreadsheetHandle for FakeHandle {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.keys().cloned().collect()
    }

    fn text_cells(&self, sheet: &str) -> Result<Vec<CellText>> {
        let Some(cells) = self.sheets.get(sheet) else {
            bail!("sheet '{sheet}' not found");
        };
        Ok(cells
            .iter()
            .map(|((row, col), text)| CellText {
                row: *row,
                col: *col,
                text: text.clone(),
                formula: self.formulas.contains(&(sheet.to_string(), *row, *col)),
            })
            .collect())
    }

    fn set_cell_text(&mut self, sheet: &str, row: u32, col: u32, text: &str) -> Result<()> {
        if self.rejected.contains(&(sheet.to_string(), row, col)) {
            bail!("cell is protected");
        }
        self.sheets
            .entry(sheet.to_string())
            .or_default()
            .insert((row, col), text.to_string());
        Ok(())
    }

    fn apply_style(&mut self, sheet: &str, row: u32, col: u32, _: &HighlightStyle) -> Result<()> {
        self.styled.insert((sheet.to_string(), row, col));
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        *self.shared.saves.lock().entry(self.origin.clone()).or_default() += 1;
        let mut body = String::new();
        for (sheet, cells) in &self.sheets {
            for ((row, col), text) in cells {
                body.push_str(&format!("{sheet}!R{row}C{col}={text}\n"));
            }
        }
        std::fs::write(path, body)?;
        Ok(())
    }
}
