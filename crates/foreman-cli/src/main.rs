mod cli;
mod commands;
mod shell;

use std::process::ExitCode;

use clap::Parser;
use foreman_core::ForemanError;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// Exit code for backing-store failures a caller cannot work around.
const EXIT_UNRECOVERABLE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Err(err) = commands::run(cli).await else {
        return ExitCode::SUCCESS;
    };

    match err.downcast_ref::<ForemanError>() {
        Some(expected) if !expected.is_unrecoverable() => match commands::emit_error(expected) {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::from(EXIT_UNRECOVERABLE),
        },
        _ => {
            error!("command failed: {err:#}");
            ExitCode::from(EXIT_UNRECOVERABLE)
        }
    }
}

/// stdout carries JSON results only; logs go to stderr.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
