//! keyble-registeruser - register users on eQ-3 eqiva Bluetooth smart locks.
//!
//! Key card data comes from `--qr-code-data` or, line by line, from stdin.
//! The process always ends through `std::process::exit` because the
//! Bluetooth stack keeps background resources alive.

mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use error::exit_codes;
use output::get_formatter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = commands::run_register(&cli).await;

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("{}", get_formatter(cli.json).format_error(&e.to_string()));
            std::process::exit(e.exit_code());
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
