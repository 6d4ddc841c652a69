//! authping binary.

use std::process::ExitCode;
use std::sync::Arc;

use authping::config::{Args, ParseFailure};
use authping::output::StdoutSink;
use authping::{SessionRegistry, engine};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "authping {[OPTIONS] [--dest] DESTINATION}...";

#[tokio::main]
async fn main() -> ExitCode {
    let invocation = match Args::parse_invocation() {
        Ok(invocation) => invocation,
        Err(ParseFailure::Clap(e)) => e.exit(),
        Err(ParseFailure::Config(e)) => {
            eprintln!("Usage:\n  {USAGE}\n\nError: {e}\nUse \"authping --help\" for detailed information.");
            return ExitCode::FAILURE;
        }
    };

    // stdout carries the records; diagnostics go to stderr.
    let default_level = match invocation.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registry = match SessionRegistry::build(invocation.destinations) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match engine::run(registry, Arc::new(StdoutSink)).await {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
