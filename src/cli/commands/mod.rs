//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Validates command-specific arguments
//! 2. Calls into the library
//! 3. Formats and displays output

mod checkpoint;
mod completion;
mod config_cmd;

pub use checkpoint::{list as checkpoint_list, resolve as checkpoint_resolve};
pub use completion::completion;
pub use config_cmd::{path as config_path, show as config_show};

use super::args::{CheckpointAction, Command, ConfigAction};
use super::Context;
use anyhow::Result;

/// Dispatch a parsed command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Checkpoint { action } => match action {
            CheckpointAction::List { history } => checkpoint_list(ctx, &history),
            CheckpointAction::Resolve { history, path, now } => {
                checkpoint_resolve(ctx, &history, &path, now)
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Show => config_show(ctx),
            ConfigAction::Path => config_path(ctx),
        },
        Command::Completion { shell } => completion(shell),
    }
}
