//! config command - Show the effective configuration

use crate::cli::Context;
use crate::ui::output;
use anyhow::{Context as _, Result};

/// Print the effective configuration as TOML.
pub fn show(ctx: &Context) -> Result<()> {
    let rendered =
        toml::to_string(&ctx.config.effective()).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

/// Print the files the configuration was read from.
pub fn path(ctx: &Context) -> Result<()> {
    let sources = ctx.config.loaded_from();
    if sources.is_empty() {
        output::print("No config files found; using defaults.", ctx.verbosity);
    }
    for source in sources {
        output::result(source.display());
    }
    Ok(())
}
