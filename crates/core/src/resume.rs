//! Resume bookkeeping
//!
//! `ResumeFilter` decides which units a previous run already completed.
//! `Frontier` turns out-of-order completions into a watermark that only
//! covers a contiguous prefix of confirmed successes.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::session::Watermark;
use crate::unit::TransferUnit;

/// Skips units at or before the stored watermark
#[derive(Debug, Clone, Default)]
pub struct ResumeFilter {
    watermark: Option<Watermark>,
}

impl ResumeFilter {
    pub fn new(watermark: Option<Watermark>) -> Self {
        Self { watermark }
    }

    /// True if the unit at `position` was completed by an earlier run.
    ///
    /// Fails when the unit at the watermark position is not the recorded
    /// source, which means the data log was rewritten.
    pub fn is_completed(&self, position: u64, unit: &TransferUnit) -> Result<bool> {
        let Some(watermark) = &self.watermark else {
            return Ok(false);
        };

        if position < watermark.position {
            return Ok(true);
        }
        if position > watermark.position {
            return Ok(false);
        }
        if unit.source.name == watermark.source {
            Ok(true)
        } else {
            Err(Error::Session(format!(
                "data log changed: expected '{}' at position {position}, found '{}'",
                watermark.source, unit.source.name
            )))
        }
    }
}

/// Contiguous completed prefix of the plan
#[derive(Debug, Clone)]
pub struct Frontier {
    next: u64,
    done: BTreeMap<u64, String>,
    /// Lowest failed position; the prefix cannot grow past it this run
    failed: Option<u64>,
}

impl Frontier {
    /// Start after `watermark`, or at the first unit
    pub fn new(watermark: Option<&Watermark>) -> Self {
        Self {
            next: watermark.map_or(1, |w| w.position + 1),
            done: BTreeMap::new(),
            failed: None,
        }
    }

    /// Record a success; returns the new watermark if the prefix grew
    pub fn complete(&mut self, position: u64, source: &str) -> Option<Watermark> {
        if position < self.next || self.failed.is_some_and(|failed| position > failed) {
            return None;
        }
        self.done.insert(position, source.to_string());

        let mut advanced = None;
        while let Some(source) = self.done.remove(&self.next) {
            advanced = Some(Watermark {
                position: self.next,
                source,
            });
            self.next += 1;
        }
        advanced
    }

    /// Record a failure. Successes after it are no longer kept since the
    /// watermark cannot pass `position` in this run.
    pub fn fail(&mut self, position: u64) {
        if position < self.next || self.failed.is_some_and(|failed| failed <= position) {
            return;
        }
        self.failed = Some(position);
        self.done.retain(|&held, _| held < position);
    }

    /// Successes held back by an earlier unit that has not completed
    pub fn pending(&self) -> usize {
        self.done.len()
    }
}
