use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILTER: &str = "sheet_sweep=info";

/// Install the global subscriber. `RUST_LOG` wins over the default filter.
///
/// Logs go to stderr so stdout carries only the progress bar and summary. Calling this twice is
/// harmless; the second install is ignored.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
