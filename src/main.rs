//! # Overseer
//!
//! Converges supervisord programs to the state declared in a TOML manifest.
//!
//! Logs go to stderr (`RUST_LOG` overrides the level); command results go to
//! stdout. Any failure prints `Error: <message>` and exits 1.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use overseer::{cli::Cli, commands};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = commands::execute(&cli) {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
