//! Delimited audit report of every matched cell.

use crate::config::{ReportEncoding, ReportFormat};
use crate::model::ChangeRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use encoding_rs::SHIFT_JIS;
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_HEADER: [&str; 7] = [
    "File Path",
    "Sheet",
    "Cell",
    "Old Value",
    "New Value",
    "Status",
    "Message",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn report_file_name(now: DateTime<Local>, format: ReportFormat) -> String {
    format!(
        "replacement_report_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Render rows in aggregation order. Fields are quoted only when they contain the delimiter,
/// a quote, or a line break.
pub fn render_report(changes: &[ChangeRecord], format: ReportFormat) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(Vec::new());

    writer.write_record(REPORT_HEADER)?;
    for change in changes {
        let path = change.file_path.display().to_string();
        writer.write_record([
            path.as_str(),
            change.sheet_name.as_str(),
            change.cell_address.as_str(),
            change.old_value.as_str(),
            change.new_value.as_str(),
            change.status.as_ref(),
            change.message.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush report rows: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn encode_report(text: &str, encoding: ReportEncoding) -> Vec<u8> {
    match encoding {
        ReportEncoding::Utf8 => text.as_bytes().to_vec(),
        ReportEncoding::Utf8Bom => {
            let mut out = Vec::with_capacity(UTF8_BOM.len() + text.len());
            out.extend_from_slice(UTF8_BOM);
            out.extend_from_slice(text.as_bytes());
            out
        }
        ReportEncoding::ShiftJis => {
            let (bytes, _, had_unmappable) = SHIFT_JIS.encode(text);
            if had_unmappable {
                tracing::warn!("report contains characters outside Shift-JIS; they were escaped");
            }
            bytes.into_owned()
        }
    }
}

/// Write the report into `out_dir` and return its path.
pub fn write_report(
    changes: &[ChangeRecord],
    out_dir: &Path,
    format: ReportFormat,
    encoding: ReportEncoding,
) -> Result<PathBuf> {
    let path = out_dir.join(report_file_name(Local::now(), format));
    let text = render_report(changes, format)?;
    fs::write(&path, encode_report(&text, encoding))
        .with_context(|| format!("failed to write report {:?}", path))?;
    tracing::info!(path = %path.display(), rows = changes.len(), "report written");
    Ok(path)
}
