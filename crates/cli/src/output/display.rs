//! Terminal display sink
//!
//! Shows a spinner while the plan is scanned, then a byte progress bar fed
//! by the accounter's snapshots. In JSON mode every copied unit becomes one
//! JSON line instead; in quiet mode one plain `'source' -> 'target'` line.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use rcopy_core::{AccountStat, DisplaySink, Error, RunSummary, TransferUnit};
use serde::Serialize;

use super::Formatter;

const TICK: Duration = Duration::from_millis(100);

/// Per-unit message printed in JSON and quiet mode
#[derive(Debug, Serialize)]
struct CopyMessage<'a> {
    source: &'a str,
    target: &'a str,
    length: u64,
}

impl fmt::Display for CopyMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "‘{}’ -> ‘{}’", self.source, self.target)
    }
}

/// `DisplaySink` writing to the terminal
pub struct TerminalDisplay {
    formatter: Formatter,
    bar: ProgressBar,
    transferring: AtomicBool,
    scanned: AtomicU64,
}

impl TerminalDisplay {
    pub fn new(formatter: Formatter) -> Self {
        let bar = if formatter.config().show_progress() {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar.enable_steady_tick(TICK);
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            formatter,
            bar,
            transferring: AtomicBool::new(false),
            scanned: AtomicU64::new(0),
        }
    }

    /// Remove the bar from the terminal
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }

    fn switch_to_transfer(&self, total: u64) {
        if self.transferring.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        self.bar.set_length(total);
    }
}

impl DisplaySink for TerminalDisplay {
    fn scanned(&self, _unit: &TransferUnit) {
        let count = self.scanned.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 64 == 1 {
            self.bar.set_message(format!("Scanning: {count} objects"));
        }
    }

    fn prepare_error(&self, unit: &TransferUnit) {
        let message = format!(
            "{}: {}",
            unit.source.name,
            unit.error.as_deref().unwrap_or("unknown error")
        );
        self.bar.suspend(|| self.formatter.error(&message));
    }

    fn progress(&self, stat: &AccountStat) {
        self.switch_to_transfer(stat.total);
        self.bar.set_position(stat.transferred);
        self.bar
            .set_message(format!("{}/s", format_size(stat.speed as u64, BINARY)));
    }

    fn copied(&self, unit: &TransferUnit) {
        let message = CopyMessage {
            source: &unit.source.name,
            target: &unit.target,
            length: unit.size(),
        };
        if self.formatter.is_json() {
            self.formatter.json_line(&message);
        } else if self.formatter.config().quiet {
            self.formatter.line(&message.to_string());
        }
    }

    fn failed(&self, unit: &TransferUnit, error: &Error) {
        let message = format!("Failed to copy '{}' to '{}': {error}", unit.source.name, unit.target);
        self.bar.suspend(|| self.formatter.error(&message));
    }

    fn finished(&self, summary: &RunSummary) {
        self.clear();

        if self.formatter.is_json() {
            self.formatter.json_line(summary);
            return;
        }

        let mut line = format!(
            "Copied {} object(s), {}",
            summary.copied_objects,
            self.formatter
                .style_size(&format_size(summary.copied_bytes, BINARY))
        );
        if summary.speed > 0.0 {
            line.push_str(&format!(
                " at {}/s",
                self.formatter
                    .style_size(&format_size(summary.speed as u64, BINARY))
            ));
        }
        if summary.skipped_objects > 0 {
            line.push_str(&format!(", {} already done", summary.skipped_objects));
        }

        let failures = summary.failed_objects + summary.unresolved_sources;
        if failures == 0 {
            self.formatter.success(&line);
        } else {
            self.formatter.println(&line);
            self.formatter
                .warning(&format!("{failures} object(s) could not be copied"));
        }
    }
}
