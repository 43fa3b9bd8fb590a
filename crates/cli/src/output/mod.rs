//! Output formatting and the terminal display
//!
//! Commands receive an explicit `OutputConfig` instead of reading global
//! flags.

mod display;
mod formatter;

pub use display::TerminalDisplay;
pub use formatter::Formatter;

/// Output settings from the global command line flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Strict JSON output, no colors or progress
    pub json: bool,
    /// Disable colors
    pub no_color: bool,
    /// Only print errors
    pub quiet: bool,
}

impl OutputConfig {
    /// Progress bars and byte counting are only shown to a human
    pub fn show_progress(&self) -> bool {
        !self.json && !self.quiet
    }
}
