//! Display sink for run events
//!
//! The engine reports scanning, per-unit outcomes and progress snapshots to
//! a sink. A terminal bar, structured log lines or nothing at all can sit
//! behind it.

use crate::coordinator::RunSummary;
use crate::error::Error;
use crate::progress::AccountStat;
use crate::unit::TransferUnit;

/// Consumer of progress snapshots and per-unit messages
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySink: Send + Sync {
    /// A unit was added to the plan
    fn scanned(&self, _unit: &TransferUnit) {}

    /// A source could not be resolved during preparation
    fn prepare_error(&self, _unit: &TransferUnit) {}

    /// A unit's transfer is starting
    fn started(&self, _unit: &TransferUnit) {}

    /// Periodic progress snapshot
    fn progress(&self, _stat: &AccountStat) {}

    fn copied(&self, _unit: &TransferUnit) {}

    fn failed(&self, _unit: &TransferUnit, _error: &Error) {}

    /// The run drained every unit
    fn finished(&self, _summary: &RunSummary) {}
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {}
