use anyhow::Result;
use std::path::Path;

mod umya_backend;

pub use umya_backend::UmyaBackend;

/// Text-bearing cell with 1-indexed coordinates.
///
/// For formula cells `text` is the cached result of the last calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellText {
    pub row: u32,
    pub col: u32,
    pub text: String,
    pub formula: bool,
}

/// Visual mark applied to every rewritten cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightStyle {
    pub bold: bool,
    pub font_argb: &'static str,
}

pub const REPLACEMENT_HIGHLIGHT: HighlightStyle = HighlightStyle {
    bold: true,
    font_argb: "FF4180C4",
};

/// An open, mutable, in-memory workbook.
pub trait SpreadsheetHandle: Send {
    fn sheet_names(&self) -> Vec<String>;

    /// Non-empty cells of `sheet`, sorted row-major.
    fn text_cells(&self, sheet: &str) -> Result<Vec<CellText>>;

    fn set_cell_text(&mut self, sheet: &str, row: u32, col: u32, text: &str) -> Result<()>;

    fn apply_style(&mut self, sheet: &str, row: u32, col: u32, style: &HighlightStyle)
    -> Result<()>;

    /// Serialize the whole workbook to `path`.
    fn write_to(&self, path: &Path) -> Result<()>;
}

pub trait SpreadsheetBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SpreadsheetHandle>>;
    fn name(&self) -> &'static str;
}
