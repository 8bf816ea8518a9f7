mod algorithms;
mod cli;
mod engine;
mod error;
mod metrics;
mod model;
mod orchestrator;
mod params;
mod plugin;
mod registry;
mod scores;
mod session;
mod storage;
mod text_summary;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_quiet = args.quiet;

    // Setup logging based on verbosity
    let filter = match (is_quiet, args.verbose) {
        (true, _) => EnvFilter::new("error"),
        (false, 0) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        (false, 1) => EnvFilter::new("info"),
        (false, 2) => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli::run(args) {
        Ok(()) => Ok(()),
        Err(e) => {
            let message = cli::user_message(&e);
            if is_quiet {
                println!("{message}");
                std::process::exit(1);
            }
            Err(anyhow::anyhow!(message))
        }
    }
}
