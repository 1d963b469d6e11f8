pub mod output;

use crate::batch::{BatchCoordinator, BatchRequest};
use crate::config::SweepConfig;
use crate::report::write_report;
use anyhow::{Context, Result};
use std::process::ExitCode;
use std::time::Instant;

/// Exit status of a batch that finished but could not save every workbook.
pub const EXIT_SAVE_FAILED: u8 = 2;

/// A missing replacement switches the run to search-only; an empty one deletes the match.
pub fn resolve_mode(replace: Option<String>, search_only: bool) -> (String, bool) {
    match replace {
        Some(replace) if !search_only => (replace, false),
        _ => (String::new(), true),
    }
}

pub async fn run_sweep(
    config: &SweepConfig,
    search: Option<String>,
    replace: Option<String>,
    search_only: bool,
) -> Result<ExitCode> {
    let search = search
        .filter(|s| !s.is_empty())
        .context("search text is required (--search)")?;
    let (replace, search_only) = resolve_mode(replace, search_only);
    config.ensure_root()?;

    let coordinator = BatchCoordinator::from_config(config);
    let request = BatchRequest::from_config(config, search.clone(), replace.clone(), search_only);

    output::emit_header(
        &config.root,
        &search,
        &replace,
        search_only,
        coordinator.workers(),
    );

    let started = Instant::now();
    let mut processed = 0usize;
    let outcome = coordinator
        .run_batch(&request, |snapshot| {
            processed = snapshot.processed_count;
            output::emit_progress(snapshot);
        })
        .await?;

    if outcome.changes.is_empty() {
        println!("No matching cells found.");
    } else {
        let path = write_report(
            &outcome.changes,
            &config.root,
            config.report_format,
            config.report_encoding,
        )?;
        println!("Report: {}", path.display());
    }

    for line in output::summary_lines(&outcome, processed, search_only, started.elapsed()) {
        println!("{line}");
    }

    if let Some(error) = outcome.error() {
        tracing::error!(error = %error, "batch finished with save failures");
        return Ok(ExitCode::from(EXIT_SAVE_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}
