//! Command implementations
//!
//! `cp` starts a new session; `session` lists, resumes and clears saved
//! ones. Both end in `run_session`.

pub mod cp;
pub mod session;

use std::sync::Arc;

use anyhow::Context as _;
use rcopy_core::{
    Config, ConfigManager, Coordinator, RemotePath, RunOptions, RunOutcome, Session,
    SessionStore, StoreRouter, default_concurrency,
};
use rcopy_s3::S3Client;
use tokio_util::sync::CancellationToken;

use crate::exit_code::{self, ExitCode};
use crate::output::{Formatter, OutputConfig, TerminalDisplay};

/// State shared by every command
pub struct Context {
    pub manager: ConfigManager,
    pub config: Config,
    pub output: OutputConfig,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn load(output: OutputConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        let manager = ConfigManager::new().context("Failed to locate configuration directory")?;
        let config = manager
            .load()
            .with_context(|| format!("Failed to load configuration from {}", manager.dir().display()))?;
        Ok(Self {
            manager,
            config,
            output,
            cancel,
        })
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.manager.session_dir())
    }

    pub fn formatter(&self) -> Formatter {
        Formatter::new(self.output)
    }
}

/// Route identifiers to S3 clients for every configured alias they name
async fn build_router(config: &Config, args: &[String]) -> anyhow::Result<StoreRouter> {
    let mut router = StoreRouter::new();
    let mut connected = Vec::new();

    for arg in args {
        let Ok(path) = RemotePath::parse(arg) else {
            continue;
        };
        let Some(alias) = config.alias(&path.alias) else {
            continue;
        };
        if connected.contains(&alias.name) {
            continue;
        }

        let client = S3Client::new(alias.clone())
            .await
            .with_context(|| format!("Failed to create S3 client for alias '{}'", alias.name))?
            .with_retry(config.retry.clone());
        tracing::debug!(alias = %alias.name, endpoint = %alias.endpoint, "Connected alias");
        router = router.with_remote(alias.name.clone(), Arc::new(client));
        connected.push(alias.name.clone());
    }

    Ok(router)
}

/// Concurrency from the flag, then the config file, then the CPU count
fn concurrency(flag: Option<usize>, config: &Config) -> usize {
    flag.filter(|n| *n > 0)
        .or(Some(config.defaults.parallel).filter(|n| *n > 0))
        .unwrap_or_else(default_concurrency)
}

/// Run `session` to the end and report how it went
pub(crate) async fn run_session(
    ctx: &Context,
    session: Session,
    parallel: Option<usize>,
) -> ExitCode {
    let formatter = ctx.formatter();

    let router = match build_router(&ctx.config, &session.header.command_args).await {
        Ok(router) => router,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return exit_code::for_error(&e);
        }
    };

    let display = Arc::new(TerminalDisplay::new(formatter.clone()));
    let options = RunOptions {
        concurrency: concurrency(parallel, &ctx.config),
        show_progress: ctx.output.show_progress(),
    };
    tracing::debug!(session = %session.id(), concurrency = options.concurrency, "Starting run");

    let coordinator = Coordinator::new(Arc::new(router), display.clone(), options, ctx.cancel.clone());
    let outcome = coordinator.run(session).await;
    display.clear();

    match outcome {
        Ok(RunOutcome::Completed(summary)) => {
            if summary.failed_objects + summary.unresolved_sources > 0 {
                ExitCode::GeneralError
            } else {
                ExitCode::Success
            }
        }
        Ok(RunOutcome::Interrupted {
            session_id,
            summary,
        }) => {
            if formatter.is_json() {
                formatter.json_line(&serde_json::json!({
                    "status": "interrupted",
                    "session": session_id,
                    "copied_objects": summary.copied_objects,
                }));
            } else {
                formatter.warning(&format!(
                    "Interrupted after {} object(s). Session '{}' saved, resume with: rcopy session resume {}",
                    summary.copied_objects,
                    formatter.style_name(&session_id),
                    session_id
                ));
            }
            ExitCode::Interrupted
        }
        Ok(RunOutcome::Cancelled) => {
            formatter.warning("Interrupted while scanning sources, nothing was copied");
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Copy failed: {e}"));
            ExitCode::from(&e)
        }
    }
}
