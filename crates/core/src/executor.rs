//! Bounded pool of transfer tasks
//!
//! Each unit is copied by its own task holding one permit of a counting
//! semaphore. The permit is acquired before the task starts and dropped
//! when the task ends, even by panic, so no more than `limit` transfers run
//! at once. Outcomes go to a shared status channel.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;

use crate::display::DisplaySink;
use crate::error::{Error, Result};
use crate::progress::Accounter;
use crate::traits::ObjectStore;
use crate::unit::TransferUnit;

/// `max(cpus - 1, 1)`
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// Terminal outcome of one unit
#[derive(Debug)]
pub struct CopyStatus {
    /// Position of the unit in the plan
    pub position: u64,
    pub unit: TransferUnit,
    /// Bytes copied, or the failure
    pub result: Result<u64>,
}

/// Dispatches units onto a bounded set of transfer tasks
pub struct Executor {
    store: Arc<dyn ObjectStore>,
    accounter: Option<Accounter>,
    sink: Arc<dyn DisplaySink>,
    slots: Arc<Semaphore>,
    status: mpsc::Sender<CopyStatus>,
    tasks: JoinSet<()>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        limit: usize,
        status: mpsc::Sender<CopyStatus>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        let limit = limit.max(1);
        Self {
            store,
            accounter: None,
            sink,
            slots: Arc::new(Semaphore::new(limit)),
            status,
            tasks: JoinSet::new(),
        }
    }

    /// Count transferred bytes through `accounter`; without it streams are not wrapped
    pub fn with_progress(mut self, accounter: Accounter) -> Self {
        self.accounter = Some(accounter);
        self
    }

    /// Wait for a free pool slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::General(format!("transfer pool closed: {e}")))
    }

    /// Start copying `unit` in the background, holding `permit` until done
    pub fn spawn(&mut self, permit: OwnedSemaphorePermit, position: u64, unit: TransferUnit) {
        while self.tasks.try_join_next().is_some() {}

        let store = self.store.clone();
        let accounter = self.accounter.clone();
        let sink = self.sink.clone();
        let status = self.status.clone();

        self.tasks.spawn(async move {
            let _permit = permit;
            sink.started(&unit);
            tracing::debug!(position, source = %unit.source.name, "Copying");

            let result = copy_unit(store.as_ref(), accounter.as_ref(), &unit).await;
            let outcome = CopyStatus {
                position,
                unit,
                result,
            };
            if status.send(outcome).await.is_err() {
                tracing::debug!(position, "Status collector gone, dropping outcome");
            }
        });
    }

    /// Report a unit that must not be copied because preparation failed for it
    pub async fn reject(&self, position: u64, unit: TransferUnit) {
        let error = Error::General(unit.error.clone().unwrap_or_default());
        let outcome = CopyStatus {
            position,
            unit,
            result: Err(error),
        };
        if self.status.send(outcome).await.is_err() {
            tracing::debug!(position, "Status collector gone, dropping rejection");
        }
    }

    /// Account for a unit completed by an earlier run without copying it
    pub fn fast_forward(&self, unit: &TransferUnit) {
        if let Some(accounter) = &self.accounter {
            accounter.fast_forward(unit.size());
        }
    }

    /// Wait for every in-flight transfer, then release the status channel
    pub async fn drain(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                tracing::error!(error = %e, "Transfer task panicked");
            }
        }
    }
}

/// Copy one unit: open the source, optionally count it, put it to the target
async fn copy_unit(
    store: &dyn ObjectStore,
    accounter: Option<&Accounter>,
    unit: &TransferUnit,
) -> Result<u64> {
    if let Some(error) = &unit.error {
        return Err(Error::General(error.clone()));
    }

    let (reader, size) = store.open(&unit.source.name).await?;
    let reader = match accounter {
        Some(accounter) => accounter.wrap(reader),
        None => reader,
    };
    store.put(&unit.target, size, reader).await?;
    Ok(size)
}
