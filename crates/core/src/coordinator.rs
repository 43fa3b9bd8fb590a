//! Run coordination
//!
//! Drives one copy invocation through its states:
//! prepare the plan (unless the session already has one), replay the plan
//! while dispatching units to the transfer pool, collect outcomes into the
//! resume watermark, and finally either delete the session (done) or close
//! it for a later resume (interrupted).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::display::DisplaySink;
use crate::error::{Error, Result};
use crate::executor::{CopyStatus, Executor, default_concurrency};
use crate::path::validate_copy_args;
use crate::prepare::prepare_units;
use crate::progress::Accounter;
use crate::resume::{Frontier, ResumeFilter};
use crate::session::{Session, SessionReader};
use crate::traits::ObjectStore;

/// Settings for one run, passed explicitly instead of process-wide flags
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum concurrent transfers
    pub concurrency: usize,
    /// Count bytes through the transfer streams for a live display
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            show_progress: true,
        }
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_bytes: u64,
    pub total_objects: u64,
    pub copied_objects: u64,
    pub copied_bytes: u64,
    /// Units completed by an earlier run of the same session
    pub skipped_objects: u64,
    pub failed_objects: u64,
    /// Sources this run could not resolve while preparing the plan
    pub unresolved_sources: u64,
    /// Average bytes per second, 0 when progress was not tracked
    pub speed: f64,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every unit reached a terminal status; the session was deleted
    Completed(RunSummary),
    /// Stopped by an interrupt; the session was kept for resume
    Interrupted {
        session_id: String,
        summary: RunSummary,
    },
    /// Interrupted while preparing; the session was discarded
    Cancelled,
}

/// Orchestrates preparation, dispatch and status collection for a session
pub struct Coordinator {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn DisplaySink>,
    options: RunOptions,
    cancel: CancellationToken,
}

enum DispatchEnd {
    Exhausted,
    Interrupted,
}

#[derive(Debug, Default)]
struct Tally {
    copied_objects: u64,
    copied_bytes: u64,
    failed_objects: u64,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn DisplaySink>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            sink,
            options,
            cancel,
        }
    }

    /// Run `session` to completion or interruption.
    ///
    /// Errors returned here are fatal session errors; per-unit failures are
    /// reported to the sink and counted in the summary.
    pub async fn run(&self, mut session: Session) -> Result<RunOutcome> {
        let mut unresolved = 0;
        if !session.has_data().await {
            match self.prepare(&mut session).await {
                Ok(Some(count)) => unresolved = count,
                Ok(None) => {
                    tracing::debug!(session = %session.id(), "Interrupted while preparing");
                    session.delete().await?;
                    return Ok(RunOutcome::Cancelled);
                }
                Err(e) => {
                    // A partial plan cannot be resumed
                    if let Err(cleanup) = session.delete().await {
                        tracing::warn!(error = %cleanup, "Unable to discard unprepared session");
                    }
                    return Err(e);
                }
            }
        } else {
            tracing::debug!(
                session = %session.id(),
                watermark = ?session.watermark(),
                "Resuming prepared session"
            );
        }

        self.execute(session, unresolved).await
    }

    /// Write the plan into the session. Returns the number of sources that
    /// could not be resolved, or `None` when interrupted.
    async fn prepare(&self, session: &mut Session) -> Result<Option<u64>> {
        let args = session.header.command_args.clone();
        validate_copy_args(&args)?;
        let (sources, target) = args.split_at(args.len() - 1);

        let mut writer = session.create_writer().await?;
        let mut units = prepare_units(self.store.clone(), sources.to_vec(), target[0].clone());
        let mut unresolved = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                next = units.next() => next,
            };
            let Some(unit) = next else { break };

            if !unit.is_ok() {
                tracing::warn!(
                    source = %unit.source.name,
                    error = unit.error.as_deref().unwrap_or_default(),
                    "Unable to prepare source for copying"
                );
                self.sink.prepare_error(&unit);
                unresolved += 1;
                continue;
            }

            writer.append(&unit).await?;
            self.sink.scanned(&unit);
        }

        let totals = writer.finish().await?;
        session.mark_ready(totals).await?;
        tracing::debug!(bytes = totals.bytes, objects = totals.objects, "Plan ready");
        Ok(Some(unresolved))
    }

    async fn execute(&self, session: Session, unresolved: u64) -> Result<RunOutcome> {
        let mut summary = RunSummary {
            total_bytes: session.header.total_bytes,
            total_objects: session.header.total_objects,
            unresolved_sources: unresolved,
            ..Default::default()
        };
        let watermark = session.watermark().cloned();
        let mut reader = session.reader().await?;

        let accounter = self
            .options
            .show_progress
            .then(|| Accounter::start(summary.total_bytes, self.sink.clone()));

        let (status_tx, status_rx) = mpsc::channel(self.options.concurrency.max(1) * 2);
        let mut executor = Executor::new(
            self.store.clone(),
            self.options.concurrency,
            status_tx,
            self.sink.clone(),
        );
        if let Some(accounter) = &accounter {
            executor = executor.with_progress(accounter.clone());
        }

        // Stops dispatch on interrupt or when the collector hits a fatal error
        let halt = self.cancel.child_token();
        let collector = tokio::spawn(collect_status(
            session,
            status_rx,
            Frontier::new(watermark.as_ref()),
            self.sink.clone(),
            halt.clone(),
        ));

        let filter = ResumeFilter::new(watermark);
        let dispatched =
            dispatch_all(&mut reader, &mut executor, &filter, &halt, &mut summary).await;

        executor.drain().await;
        let collected = collector
            .await
            .map_err(|e| Error::General(format!("status collector failed: {e}")))?;
        let (session, tally) = collected?;

        summary.copied_objects = tally.copied_objects;
        summary.copied_bytes = tally.copied_bytes;
        summary.failed_objects = tally.failed_objects;
        if let Some(accounter) = &accounter {
            summary.speed = accounter.finalize().speed;
        }

        match dispatched {
            Err(e) => {
                session.close().await?;
                Err(e)
            }
            Ok(DispatchEnd::Interrupted) => {
                let session_id = session.id().to_string();
                tracing::debug!(session = %session_id, watermark = ?session.watermark(), "Session preserved");
                session.close().await?;
                Ok(RunOutcome::Interrupted {
                    session_id,
                    summary,
                })
            }
            Ok(DispatchEnd::Exhausted) => {
                self.sink.finished(&summary);
                session.delete().await?;
                Ok(RunOutcome::Completed(summary))
            }
        }
    }
}

/// Replay the plan, fast-forwarding completed units and dispatching the rest
async fn dispatch_all(
    reader: &mut SessionReader,
    executor: &mut Executor,
    filter: &ResumeFilter,
    halt: &CancellationToken,
    summary: &mut RunSummary,
) -> Result<DispatchEnd> {
    loop {
        let next = tokio::select! {
            biased;
            _ = halt.cancelled() => return Ok(DispatchEnd::Interrupted),
            next = reader.next_unit() => next?,
        };
        let Some((position, unit)) = next else {
            return Ok(DispatchEnd::Exhausted);
        };

        if filter.is_completed(position, &unit)? {
            executor.fast_forward(&unit);
            summary.skipped_objects += 1;
            continue;
        }

        if !unit.is_ok() {
            executor.reject(position, unit).await;
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = halt.cancelled() => return Ok(DispatchEnd::Interrupted),
            permit = executor.acquire() => permit?,
        };
        executor.spawn(permit, position, unit);
    }
}

/// Consume outcomes until every sender is gone, advancing the watermark
/// through the contiguous prefix of successes.
async fn collect_status(
    mut session: Session,
    mut statuses: mpsc::Receiver<CopyStatus>,
    mut frontier: Frontier,
    sink: Arc<dyn DisplaySink>,
    halt: CancellationToken,
) -> Result<(Session, Tally)> {
    let mut tally = Tally::default();

    while let Some(status) = statuses.recv().await {
        match status.result {
            Ok(bytes) => {
                tally.copied_objects += 1;
                tally.copied_bytes += bytes;
                sink.copied(&status.unit);

                if let Some(watermark) = frontier.complete(status.position, &status.unit.source.name)
                {
                    session.set_watermark(watermark);
                    if let Err(e) = session.checkpoint().await {
                        halt.cancel();
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                tally.failed_objects += 1;
                frontier.fail(status.position);
                tracing::warn!(
                    source = %status.unit.source.name,
                    destination = %status.unit.target,
                    error = %e,
                    "Failed to copy"
                );
                sink.failed(&status.unit, &e);
            }
        }
    }

    if frontier.pending() > 0 {
        tracing::debug!(
            held_back = frontier.pending(),
            "Successes after a failed unit will be copied again on resume"
        );
    }
    Ok((session, tally))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{MockDisplaySink, NullDisplay};
    use crate::memory::MemoryStore;
    use crate::session::SessionStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn options(concurrency: usize) -> RunOptions {
        RunOptions {
            concurrency,
            show_progress: false,
        }
    }

    async fn session(store: &SessionStore, args: &[&str]) -> Session {
        store
            .create(
                "cp",
                args.iter().map(|s| s.to_string()).collect(),
                PathBuf::from("/"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_completed_run_deletes_session() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionStore::new(dir.path());
        let objects = MemoryStore::new();
        objects.insert("a", vec![1u8; 100]);
        objects.insert("b", vec![2u8; 200]);

        let coordinator = Coordinator::new(
            Arc::new(objects.clone()),
            Arc::new(NullDisplay),
            options(2),
            CancellationToken::new(),
        );
        let outcome = coordinator
            .run(session(&sessions, &["a", "b", "T"]).await)
            .await
            .unwrap();

        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(summary.total_bytes, 300);
        assert_eq!(summary.total_objects, 2);
        assert_eq!(summary.copied_objects, 2);
        assert_eq!(objects.get("T/b").unwrap(), vec![2u8; 200]);
        assert!(sessions.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_reported_once_and_run_continues() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionStore::new(dir.path());
        let objects = MemoryStore::new();
        for i in 1..=5 {
            objects.insert(format!("src/{i}"), vec![0u8; 10]);
        }
        objects.fail_reads_of("src/3");

        let mut sink = MockDisplaySink::new();
        sink.expect_scanned().times(5).returning(|_| ());
        sink.expect_started().times(5).returning(|_| ());
        sink.expect_copied().times(4).returning(|_| ());
        sink.expect_failed()
            .withf(|unit, _| unit.source.name == "src/3")
            .times(1)
            .returning(|_, _| ());
        sink.expect_finished()
            .withf(|summary| summary.failed_objects == 1 && summary.copied_objects == 4)
            .times(1)
            .returning(|_| ());

        let coordinator = Coordinator::new(
            Arc::new(objects.clone()),
            Arc::new(sink),
            options(2),
            CancellationToken::new(),
        );
        let outcome = coordinator
            .run(session(&sessions, &["src...", "T"]).await)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        for i in [1, 2, 4, 5] {
            assert!(objects.get(&format!("T/{i}")).is_some());
        }
        assert!(objects.get("T/3").is_none());
    }

    #[tokio::test]
    async fn test_interrupt_before_preparation_discards_session() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionStore::new(dir.path());
        let objects = MemoryStore::new();
        objects.insert("a", vec![0u8; 1]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let coordinator = Coordinator::new(
            Arc::new(objects.clone()),
            Arc::new(NullDisplay),
            options(1),
            cancel,
        );
        let outcome = coordinator
            .run(session(&sessions, &["a", "T"]).await)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(sessions.list().await.unwrap().is_empty());
        assert_eq!(objects.put_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_errors_are_not_planned() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionStore::new(dir.path());
        let objects = MemoryStore::new();
        objects.insert("a", vec![0u8; 4]);

        let mut sink = MockDisplaySink::new();
        sink.expect_prepare_error()
            .withf(|unit| unit.source.name == "missing")
            .times(1)
            .returning(|_| ());
        sink.expect_scanned().times(1).returning(|_| ());
        sink.expect_started().times(1).returning(|_| ());
        sink.expect_copied().times(1).returning(|_| ());
        sink.expect_finished()
            .withf(|summary| summary.total_objects == 1 && summary.unresolved_sources == 1)
            .times(1)
            .returning(|_| ());

        let coordinator = Coordinator::new(
            Arc::new(objects),
            Arc::new(sink),
            options(1),
            CancellationToken::new(),
        );
        let outcome = coordinator
            .run(session(&sessions, &["missing", "a", "T"]).await)
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_unresolved_sources_are_counted() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionStore::new(dir.path());
        let objects = MemoryStore::new();
        objects.insert("a", vec![0u8; 4]);

        let coordinator = Coordinator::new(
            Arc::new(objects.clone()),
            Arc::new(NullDisplay),
            options(1),
            CancellationToken::new(),
        );
        let outcome = coordinator
            .run(session(&sessions, &["missing", "a", "gone", "T"]).await)
            .await
            .unwrap();

        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(summary.unresolved_sources, 2);
        assert_eq!(summary.copied_objects, 1);
        assert_eq!(summary.failed_objects, 0);
        assert_eq!(objects.get("T/a").unwrap(), vec![0u8; 4]);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_rejected() {
        let dir = TempDir::new().unwrap();
        let sessions = SessionStore::new(dir.path());
        let coordinator = Coordinator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NullDisplay),
            options(1),
            CancellationToken::new(),
        );
        let err = coordinator
            .run(session(&sessions, &["only-one"]).await)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(sessions.list().await.unwrap().is_empty());
    }
}
