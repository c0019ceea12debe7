//! Consolidated styling for terminal output.
//!
//! Uses the `anstyle` ecosystem, the same pairing the teacher crate uses:
//! - `anstream` auto-detects color support (`NO_COLOR`, `CLICOLOR_FORCE`, TTY).
//! - `anstyle` composes styles without manual ANSI escape bookkeeping.
//!
//! ## stdout vs stderr
//!
//! - stdout: command results (task listings, `show` output, `Error: ...` summaries).
//! - stderr: child process output (git, hooks, setup scripts) and `log` records.

use anstyle::{AnsiColor, Color, Style};

pub use anstream::{eprint, eprintln, print, println};

pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
pub const SUCCESS: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
pub const HINT: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
pub const BOLD: Style = Style::new().bold();

pub const ERROR_EMOJI: &str = "\u{274c}";
pub const WARNING_EMOJI: &str = "\u{26a0}\u{fe0f}";
pub const SUCCESS_EMOJI: &str = "\u{2705}";

/// Print a `warning: <msg>` line to stderr, styled, matching the teacher's
/// "warnings are never silently dropped" convention (§6 persisted-state guarantee).
pub fn print_warning(msg: &str) {
    eprintln!("{WARNING}warning:{WARNING:#} {msg}");
}

/// Print an `Error: <msg>` line to stderr (§7 user-visible behaviour).
pub fn print_error(msg: &str) {
    eprintln!("{ERROR}Error:{ERROR:#} {msg}");
}
