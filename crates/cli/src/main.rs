//! rcopy - resumable copy between local folders and S3-compatible storage
//!
//! Parses the command line, sets up logging and the interrupt handler, and
//! dispatches to the command implementations.

mod commands;
mod exit_code;
mod output;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::commands::Context;
use crate::commands::cp::CpArgs;
use crate::commands::session::SessionCommands;
use crate::output::{Formatter, OutputConfig};

/// Resumable copy for files and S3-compatible object storage
#[derive(Parser, Debug)]
#[command(name = "rcopy", version, about, long_about = None)]
struct Cli {
    /// Output strict JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy files and objects
    Cp(CpArgs),

    /// Manage saved copy sessions
    #[command(subcommand)]
    Session(SessionCommands),
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Cancel `token` on the first Ctrl-C
fn watch_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupt received, finishing in-flight transfers");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let output = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    if !Formatter::new(output).colors_enabled() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cancel = CancellationToken::new();
    watch_interrupt(cancel.clone());

    let code = match Context::load(output, cancel) {
        Ok(ctx) => match cli.command {
            Commands::Cp(args) => commands::cp::execute(args, &ctx).await,
            Commands::Session(cmd) => commands::session::execute(cmd, &ctx).await,
        },
        Err(e) => {
            Formatter::new(output).error(&format!("{e:#}"));
            exit_code::for_error(&e)
        }
    };

    std::process::exit(code.as_i32());
}
