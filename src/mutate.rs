use crate::model::{ChangeRecord, ChangeStatus};
use crate::utils::cell_address;
use crate::workbook::{REPLACEMENT_HIGHLIGHT, SpreadsheetHandle};
use std::path::Path;

pub const FORMULA_NOT_REWRITTEN: &str = "formula cell not rewritten";

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub changes: Vec<ChangeRecord>,
    /// At least one cell was rewritten; the workbook needs saving.
    pub mutated: bool,
}

/// Replace every non-overlapping occurrence of `search`, left to right, literally.
pub fn replace_all_literal(text: &str, search: &str, replace: &str) -> String {
    if search.is_empty() {
        return text.to_string();
    }
    text.replace(search, replace)
}

/// Walk every sheet row-major and record (and optionally rewrite) cells containing `search`.
///
/// An empty `search` matches nothing. Formula cells match on their cached result; they are
/// reported as Found in search-only mode and as Failed otherwise, never rewritten.
pub fn scan(
    handle: &mut dyn SpreadsheetHandle,
    file_path: &Path,
    search: &str,
    replace: &str,
    search_only: bool,
) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    if search.is_empty() {
        return outcome;
    }

    for sheet_name in handle.sheet_names() {
        let cells = match handle.text_cells(&sheet_name) {
            Ok(cells) => cells,
            Err(error) => {
                tracing::warn!(
                    file = %file_path.display(),
                    sheet = %sheet_name,
                    error = %error,
                    "skipping unreadable sheet"
                );
                continue;
            }
        };

        for cell in cells.into_iter().filter(|cell| cell.text.contains(search)) {
            let address = cell_address(cell.col, cell.row);
            let mut record = ChangeRecord {
                file_path: file_path.to_path_buf(),
                sheet_name: sheet_name.clone(),
                cell_address: address,
                old_value: cell.text.clone(),
                new_value: cell.text.clone(),
                status: ChangeStatus::Found,
                message: String::new(),
            };

            if search_only {
                outcome.changes.push(record);
                continue;
            }

            // Writing text over a formula cell would replace the formula with its cached result.
            if cell.formula {
                record.status = ChangeStatus::Failed;
                record.message = FORMULA_NOT_REWRITTEN.to_string();
                outcome.changes.push(record);
                continue;
            }

            record.new_value = replace_all_literal(&cell.text, search, replace);
            match handle.set_cell_text(&sheet_name, cell.row, cell.col, &record.new_value) {
                Ok(()) => {
                    record.status = ChangeStatus::Success;
                    outcome.mutated = true;
                    if let Err(error) =
                        handle.apply_style(&sheet_name, cell.row, cell.col, &REPLACEMENT_HIGHLIGHT)
                    {
                        record.message = format!("value replaced; highlight not applied: {error}");
                    }
                }
                Err(error) => {
                    record.status = ChangeStatus::Failed;
                    record.message = format!("set cell value failed: {error}");
                }
            }
            outcome.changes.push(record);
        }
    }

    outcome
}
