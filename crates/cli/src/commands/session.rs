//! session command - Manage saved copy sessions
//!
//! List resumable sessions, resume one, or clear saved state.

use clap::{Args, Subcommand};
use humansize::{BINARY, format_size};
use rcopy_core::{Error, SessionHeader};
use serde::Serialize;

use super::{Context, run_session};
use crate::exit_code::ExitCode;

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List resumable sessions
    List,

    /// Resume an interrupted session
    Resume(ResumeArgs),

    /// Delete saved session state
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Session id
    pub id: String,

    /// Maximum concurrent transfers
    #[arg(short = 'P', long)]
    pub parallel: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Session id
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub id: Option<String>,

    /// Delete every saved session
    #[arg(long)]
    pub all: bool,
}

/// Session information for JSON output
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    created: String,
    command: String,
    args: Vec<String>,
    total_objects: u64,
    total_bytes: u64,
    /// Units confirmed copied, counted from the start of the plan
    completed: u64,
}

impl From<&SessionHeader> for SessionInfo {
    fn from(header: &SessionHeader) -> Self {
        Self {
            id: header.id.clone(),
            created: header.created.to_string(),
            command: header.command_type.clone(),
            args: header.command_args.clone(),
            total_objects: header.total_objects,
            total_bytes: header.total_bytes,
            completed: header.last_copied.as_ref().map_or(0, |w| w.position),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionListOutput {
    sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    cleared: usize,
}

/// Execute a session subcommand
pub async fn execute(cmd: SessionCommands, ctx: &Context) -> ExitCode {
    match cmd {
        SessionCommands::List => execute_list(ctx).await,
        SessionCommands::Resume(args) => execute_resume(args, ctx).await,
        SessionCommands::Clear(args) => execute_clear(args, ctx).await,
    }
}

async fn execute_list(ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    let headers = match ctx.sessions().list().await {
        Ok(headers) => headers,
        Err(e) => {
            formatter.error(&format!("Failed to list sessions: {e}"));
            return ExitCode::from(&e);
        }
    };

    if formatter.is_json() {
        formatter.json(&SessionListOutput {
            sessions: headers.iter().map(SessionInfo::from).collect(),
        });
        return ExitCode::Success;
    }

    if headers.is_empty() {
        formatter.println("No saved sessions.");
        return ExitCode::Success;
    }

    for header in &headers {
        let info = SessionInfo::from(header);
        formatter.println(&format!(
            "{} {} {} {} [{}/{} objects, {}]",
            formatter.style_name(&info.id),
            formatter.style_date(&info.created),
            formatter.style_key(&info.command),
            info.args.join(" "),
            info.completed,
            info.total_objects,
            format_size(info.total_bytes, BINARY)
        ));
    }
    ExitCode::Success
}

async fn execute_resume(args: ResumeArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let session = match ctx.sessions().open(&args.id).await {
        Ok(session) => session,
        Err(e) => {
            formatter.error(&format!("Failed to open session: {e}"));
            return ExitCode::from(&e);
        }
    };

    if session.header.command_type != "cp" {
        formatter.error(&format!(
            "Session '{}' holds an unsupported command '{}'",
            args.id, session.header.command_type
        ));
        return ExitCode::UsageError;
    }

    // Relative sources and targets are resolved against the original directory
    if let Err(e) = std::env::set_current_dir(&session.header.root_path) {
        formatter.error(&format!(
            "Failed to change to session directory {}: {e}",
            session.header.root_path.display()
        ));
        return ExitCode::from(&Error::Io(e));
    }

    run_session(ctx, session, args.parallel).await
}

async fn execute_clear(args: ClearArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    let sessions = ctx.sessions();

    let cleared = match args.id {
        Some(id) if !args.all => match sessions.open(&id).await {
            Ok(session) => session.delete().await.map(|()| 1),
            Err(e) => Err(e),
        },
        _ => sessions.clear_all().await,
    };

    match cleared {
        Ok(cleared) => {
            if formatter.is_json() {
                formatter.json(&ClearOutput { cleared });
            } else {
                formatter.success(&format!("Cleared {cleared} session(s)"));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to clear sessions: {e}"));
            ExitCode::from(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use rcopy_core::{SESSION_VERSION, SessionState, Watermark};
    use std::path::PathBuf;

    #[test]
    fn test_session_info_counts_watermark() {
        let header = SessionHeader {
            version: SESSION_VERSION,
            id: "abcdefgh".to_string(),
            created: Timestamp::UNIX_EPOCH,
            command_type: "cp".to_string(),
            command_args: vec!["a".to_string(), "T".to_string()],
            root_path: PathBuf::from("/"),
            state: SessionState::Ready,
            total_bytes: 10,
            total_objects: 5,
            last_copied: Some(Watermark {
                position: 3,
                source: "c".to_string(),
            }),
        };
        let info = SessionInfo::from(&header);
        assert_eq!(info.completed, 3);
        assert_eq!(info.args, vec!["a", "T"]);
    }
}
