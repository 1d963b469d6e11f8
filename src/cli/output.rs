use crate::model::{BatchOutcome, ProgressSnapshot};
use crate::utils::display_file_name;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const BAR_WIDTH: usize = 40;

pub fn progress_line(snapshot: &ProgressSnapshot, width: usize) -> String {
    let percent = snapshot.percent();
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!(
        "[{}{}] {:5.1}% ({}/{}) {}",
        "=".repeat(filled),
        " ".repeat(width - filled),
        percent,
        snapshot.processed_count,
        snapshot.total_count,
        display_file_name(&snapshot.current_path)
    )
}

/// Redraw the progress bar in place on stdout.
pub fn emit_progress(snapshot: &ProgressSnapshot) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    // Pad so a shorter file name fully overwrites the previous one.
    let _ = write!(handle, "\r{:<100}", progress_line(snapshot, BAR_WIDTH));
    if snapshot.processed_count == snapshot.total_count {
        let _ = writeln!(handle);
    }
    let _ = handle.flush();
}

pub fn emit_header(root: &Path, search: &str, replace: &str, search_only: bool, workers: usize) {
    println!("Target directory: {}", root.display());
    if search_only {
        println!("Mode: search only ({:?})", search);
    } else {
        println!("Mode: replace {:?} -> {:?}", search, replace);
    }
    println!("Workers: {workers}");
}

pub fn summary_lines(
    outcome: &BatchOutcome,
    processed: usize,
    search_only: bool,
    elapsed: Duration,
) -> Vec<String> {
    let noun = if search_only { "hits" } else { "replacements" };
    let mut lines = vec![
        "==== Summary ====".to_string(),
        format!("Elapsed: {:.2}s", elapsed.as_secs_f64()),
        format!("Files processed: {processed}"),
        format!("Total {noun}: {}", outcome.total_count),
    ];
    if !outcome.file_failures.is_empty() {
        lines.push(format!("Files with errors: {}", outcome.file_failures.len()));
        for failure in &outcome.file_failures {
            lines.push(format!("  {}: {}", failure.path.display(), failure.error));
        }
    }
    lines
}
