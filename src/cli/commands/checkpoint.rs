//! checkpoint command - List and resolve checkpoints of a history export

use std::fs;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::checkpoint::{self, Renderer, Response};
use crate::cli::args::HistoryArgs;
use crate::cli::Context;
use crate::core::model::{Distribution, DistributionTarget};
use crate::core::store::{MemoryStore, StoreSnapshot};
use crate::ui::output;

/// List checkpoint timestamps, oldest first.
pub fn list(ctx: &Context, args: &HistoryArgs) -> Result<()> {
    let (store, distribution) = open(args)?;
    let response = checkpoint::serve_with(&store, &distribution, "", Utc::now(), &renderer(ctx))?;

    if args.html {
        print!("{}", response.body());
        return Ok(());
    }
    if let Response::Listing { checkpoints, .. } = &response {
        if checkpoints.is_empty() {
            output::print("No checkpoints.", ctx.verbosity);
        }
        for ts in checkpoints {
            output::result(format!("{}{}/", distribution.base_path, ts));
        }
    }
    Ok(())
}

/// Resolve `path` below the distribution's base path as of `now`.
pub fn resolve(
    ctx: &Context,
    args: &HistoryArgs,
    path: &str,
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    let (store, distribution) = open(args)?;
    let now = now.unwrap_or_else(Utc::now);
    let response = checkpoint::serve_with(&store, &distribution, path, now, &renderer(ctx))
        .with_context(|| format!("{}{} is not served", distribution.base_path, path))?;

    if args.html {
        print!("{}", response.body());
        return Ok(());
    }
    match &response {
        Response::Listing { checkpoints, .. } => {
            output::result(format!("{} ({} checkpoints)", response.path(), checkpoints.len()));
        }
        Response::Index {
            canonical_path,
            publication,
            ..
        } => {
            output::result(canonical_path);
            output::print(
                format!(
                    "publication {} (version {}, created {})",
                    publication.id,
                    publication.version,
                    publication.created_at.to_rfc3339()
                ),
                ctx.verbosity,
            );
            if let Some(location) = response.redirect_location() {
                debug!(requested = response.path(), location, "canonical checkpoint");
            }
        }
    }
    Ok(())
}

fn renderer(ctx: &Context) -> Renderer {
    Renderer::new(ctx.config.listing_title().map(str::to_string))
}

/// Load the history export and build a checkpoint distribution over the
/// selected repository.
fn open(args: &HistoryArgs) -> Result<(MemoryStore, Distribution)> {
    let contents = fs::read_to_string(&args.history)
        .with_context(|| format!("Failed to read {}", args.history.display()))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", args.history.display()))?;

    let repository = match &args.repository {
        Some(name) => match snapshot
            .repositories
            .iter()
            .find(|r| &r.repository.name == name)
        {
            Some(r) => r.repository.clone(),
            None => bail!("Repository '{}' is not in the history", name),
        },
        None => match snapshot.repositories.as_slice() {
            [only] => only.repository.clone(),
            [] => bail!("The history holds no repositories"),
            _ => bail!("The history holds several repositories; choose one with --repository"),
        },
    };

    let store = MemoryStore::load(snapshot).context("Invalid history")?;
    let distribution = Distribution::new(
        repository.name.clone(),
        &args.base_path,
        DistributionTarget::Checkpoints {
            repository: repository.id,
        },
    );
    Ok((store, distribution))
}
