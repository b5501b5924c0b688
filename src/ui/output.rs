//! ui::output
//!
//! Output formatting and log setup.
//!
//! # Design
//!
//! Command results go to stdout and respect the quiet flag. Diagnostics go
//! through `tracing`; [`init_tracing`] installs the subscriber once per
//! process, writing to stderr so stdout stays clean for scripting.

use std::fmt::Display;

use tracing_subscriber::EnvFilter;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - results only, warnings and errors in the log
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags. `--quiet` wins over `--debug`.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }

    /// Log filter implied by this verbosity, if it overrides configuration.
    pub fn filter_override(self) -> Option<&'static str> {
        match self {
            Verbosity::Quiet => Some("warn"),
            Verbosity::Normal => None,
            Verbosity::Debug => Some("debug"),
        }
    }
}

/// Pick the log filter directive.
///
/// `RUST_LOG` wins, then the verbosity flags, then the configured filter.
pub fn log_directive(rust_log: Option<String>, verbosity: Verbosity, configured: &str) -> String {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .or_else(|| verbosity.filter_override().map(str::to_string))
        .unwrap_or_else(|| configured.to_string())
}

/// Install the global `tracing` subscriber.
///
/// An unparsable directive falls back to `info`. Installing twice is a
/// no-op, so tests may call this freely.
pub fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print a result line (always shown).
pub fn result(message: impl Display) {
    println!("{}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}
