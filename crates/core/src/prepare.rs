//! Source expansion into transfer units
//!
//! Resolves each source argument against the storage backend and
//! yields one `TransferUnit` per object to copy, in a stable order. A source
//! that cannot be resolved yields a unit carrying only the error; expansion
//! then moves on to the next entry.

use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::path::{SourceSpec, target_for};
use crate::traits::{ObjectInfo, ObjectStore};
use crate::unit::TransferUnit;

/// Units buffered ahead of the consumer
const PREPARE_BUFFER: usize = 256;

/// Lazily produced units; dropping it stops the producer
pub struct UnitStream {
    rx: mpsc::Receiver<TransferUnit>,
    task: JoinHandle<()>,
}

impl UnitStream {
    /// Next unit, or `None` once every source has been expanded
    pub async fn next(&mut self) -> Option<TransferUnit> {
        self.rx.recv().await
    }
}

impl Drop for UnitStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Expand `sources` against `store` into units copying to `target`.
/// Must be called inside a Tokio runtime.
pub fn prepare_units(store: Arc<dyn ObjectStore>, sources: Vec<String>, target: String) -> UnitStream {
    let (tx, rx) = mpsc::channel(PREPARE_BUFFER);
    let task = tokio::spawn(async move {
        let multiple = sources.len() > 1;
        for spec in &sources {
            if expand(store.as_ref(), spec, &target, multiple, &tx).await.is_err() {
                tracing::debug!("Unit consumer went away, stopping preparation");
                return;
            }
        }
    });
    UnitStream { rx, task }
}

type SendResult = std::result::Result<(), mpsc::error::SendError<TransferUnit>>;

async fn expand(
    store: &dyn ObjectStore,
    spec: &str,
    target: &str,
    multiple: bool,
    tx: &mpsc::Sender<TransferUnit>,
) -> SendResult {
    let source = SourceSpec::parse(spec);
    let mut entries = store.list(&source.root, source.recursive);

    if !source.recursive {
        let unit = match resolve_single(&mut entries, &source.root).await {
            Ok(info) => TransferUnit::new(&info, target_for(target, &source, &info.name, multiple)),
            Err(e) => TransferUnit::failed(spec, &e),
        };
        return tx.send(unit).await;
    }

    while let Some(entry) = entries.next().await {
        let unit = match entry {
            Ok(info) if info.is_dir => continue,
            Ok(info) => TransferUnit::new(&info, target_for(target, &source, &info.name, multiple)),
            Err(e) => TransferUnit::failed(spec, &e),
        };
        tx.send(unit).await?;
    }
    Ok(())
}

/// A non-recursive source must name exactly one file
async fn resolve_single(
    entries: &mut BoxStream<'_, Result<ObjectInfo>>,
    root: &str,
) -> Result<ObjectInfo> {
    match entries.next().await {
        Some(Ok(info)) if info.name == root && !info.is_dir => Ok(info),
        Some(Ok(_)) => Err(Error::IsDirectory(root.to_string())),
        Some(Err(e)) => Err(e),
        None => Err(Error::NotFound(root.to_string())),
    }
}
