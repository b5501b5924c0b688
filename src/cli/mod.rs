//! cli
//!
//! Command-line interface layer for the `depot` binary.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and install logging
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and hands a
//! [`Context`] to the handler for the chosen command. Handlers only read;
//! the history files they inspect are never written back.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use anyhow::{Context as _, Result};
use tracing::warn;

use crate::core::config::Config;
use crate::ui::output::{self, Verbosity};

/// State shared by all command handlers.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration
    pub config: Config,
    /// Output verbosity from `--quiet` / `--debug`
    pub verbosity: Verbosity,
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);

    let loaded = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    output::init_tracing(&output::log_directive(
        std::env::var("RUST_LOG").ok(),
        verbosity,
        loaded.config.log_filter(),
    ));
    for warning in &loaded.warnings {
        warn!(path = %warning.path.display(), "{}", warning.message);
    }

    let ctx = Context {
        config: loaded.config,
        verbosity,
    };

    commands::dispatch(cli.command, &ctx)
}
