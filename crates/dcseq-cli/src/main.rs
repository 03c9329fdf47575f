//! `dcseq`: probe the configured sequence stores, issue delivery challan
//! numbers and inspect or override the counters behind them.
//!
//! Run `dcseq --help` for the full option list. Command output goes to
//! stdout; logs go to stderr and follow `RUST_LOG`.

mod cli;

use clap::Parser;
use cli::config::{CliArgs, Settings};
use cli::telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let command = args.command.clone();
    let settings = Settings::try_from(args)?;

    init_telemetry(settings.log_format)?;
    log_startup_info(&settings);

    cli::commands::run(command, &settings)
}

fn log_startup_info(_settings: &Settings) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Starting with full config: {:#?}", _settings.store);
    } else {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Starting with state file {} and floor {}",
            _settings.store.local_path.display(),
            _settings.store.floor
        );
    }
}
