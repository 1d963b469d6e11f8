use anyhow::Result;
use clap::Parser;
use sheet_sweep::cli;
use sheet_sweep::config::{CliArgs, SweepConfig};
use sheet_sweep::logging::init_logging;
use sheet_sweep::server::run_server;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();

    let args = CliArgs::parse();
    let config = SweepConfig::from_args(&args)?;

    if args.serve {
        run_server(config).await?;
        return Ok(ExitCode::SUCCESS);
    }

    cli::run_sweep(&config, args.search, args.replace, args.search_only).await
}
