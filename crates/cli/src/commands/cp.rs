//! cp command - Copy files and objects with a resumable session
//!
//! Every invocation records its plan in a session so an interrupted copy
//! can continue with `rcopy session resume`.

use clap::Args;
use rcopy_core::validate_copy_args;

use super::{Context, run_session};
use crate::exit_code::ExitCode;

/// Copy files and objects
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Sources followed by the target. Append '...' to a source to copy a
    /// folder recursively (e.g. photos/2014...)
    #[arg(required = true, num_args = 2.., value_name = "SOURCE... TARGET")]
    pub paths: Vec<String>,

    /// Maximum concurrent transfers
    #[arg(short = 'P', long)]
    pub parallel: Option<usize>,
}

/// Execute the cp command
pub async fn execute(args: CpArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    if let Err(e) = validate_copy_args(&args.paths) {
        formatter.error(&e.to_string());
        return ExitCode::UsageError;
    }

    let root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            formatter.error(&format!("Failed to determine working directory: {e}"));
            return ExitCode::GeneralError;
        }
    };

    let session = match ctx.sessions().create("cp", args.paths, root).await {
        Ok(session) => session,
        Err(e) => {
            formatter.error(&format!("Failed to create session: {e}"));
            return ExitCode::from(&e);
        }
    };
    tracing::debug!(session = %session.id(), "Created copy session");

    run_session(ctx, session, args.parallel).await
}
