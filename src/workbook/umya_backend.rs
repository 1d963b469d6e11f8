use super::{CellText, HighlightStyle, SpreadsheetBackend, SpreadsheetHandle};
use anyhow::{Context, Result, anyhow};
use std::path::Path;
use umya_spreadsheet::{Spreadsheet, Worksheet};

#[derive(Debug, Default, Clone, Copy)]
pub struct UmyaBackend;

impl SpreadsheetBackend for UmyaBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn SpreadsheetHandle>> {
        let book = umya_spreadsheet::reader::xlsx::read(path)
            .with_context(|| format!("read spreadsheet failed: {}", path.display()))?;
        Ok(Box::new(UmyaHandle { book }))
    }

    fn name(&self) -> &'static str {
        "umya"
    }
}

pub struct UmyaHandle {
    book: Spreadsheet,
}

impl UmyaHandle {
    fn sheet(&self, name: &str) -> Result<&Worksheet> {
        self.book
            .get_sheet_by_name(name)
            .ok_or_else(|| anyhow!("sheet '{}' not found", name))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut Worksheet> {
        self.book
            .get_sheet_by_name_mut(name)
            .ok_or_else(|| anyhow!("sheet '{}' not found", name))
    }
}

impl SpreadsheetHandle for UmyaHandle {
    fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|sheet| sheet.get_name().to_string())
            .collect()
    }

    fn text_cells(&self, sheet: &str) -> Result<Vec<CellText>> {
        let sheet = self.sheet(sheet)?;
        let mut cells: Vec<CellText> = sheet
            .get_cell_collection()
            .into_iter()
            .filter_map(|cell| {
                let text = cell.get_value();
                if text.is_empty() {
                    return None;
                }
                let coordinate = cell.get_coordinate();
                Some(CellText {
                    row: *coordinate.get_row_num(),
                    col: *coordinate.get_col_num(),
                    text: text.into_owned(),
                    formula: cell.is_formula(),
                })
            })
            .collect();
        cells.sort_by_key(|cell| (cell.row, cell.col));
        Ok(cells)
    }

    fn set_cell_text(&mut self, sheet: &str, row: u32, col: u32, text: &str) -> Result<()> {
        let sheet = self.sheet_mut(sheet)?;
        sheet
            .get_cell_mut((col, row))
            .set_value_string(text.to_string());
        Ok(())
    }

    fn apply_style(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
        style: &HighlightStyle,
    ) -> Result<()> {
        let sheet = self.sheet_mut(sheet)?;
        let font = sheet.get_style_mut((col, row)).get_font_mut();
        font.set_bold(style.bold);
        font.get_color_mut().set_argb(style.font_argb);
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        umya_spreadsheet::writer::xlsx::write(&self.book, path)
            .with_context(|| format!("write spreadsheet failed: {}", path.display()))
    }
}
