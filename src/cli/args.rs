//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Layer this config file over the global one
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::types::CheckpointTimestamp;

/// depot - Versioned content repositories with checkpoint publications
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file layered over the global configuration
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output; only results and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect the checkpoint read path of a repository history
    #[command(
        name = "checkpoint",
        long_about = "Inspect checkpoint publications of a repository history.\n\n\
            The history is a JSON export of a repository store: repositories with \
            their versions and publications, plus content units. Only publications \
            flagged as checkpoints are addressable by timestamp.",
        after_help = "\
WORKFLOW EXAMPLES:
    # List checkpoint timestamps
    depot checkpoint list --history store.json --base-path /zoo/cp

    # Resolve a timestamp to the checkpoint it denotes
    depot checkpoint resolve --history store.json --base-path /zoo/cp 20240501T120500Z

    # Render the index page served for a timestamp
    depot checkpoint resolve --history store.json --base-path /zoo/cp 20240501T120500Z --html"
    )]
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show the effective configuration
    #[command(
        name = "config",
        long_about = "Show the effective configuration.\n\n\
            Configuration is read from $REPODEPOT_CONFIG, \
            $XDG_CONFIG_HOME/repodepot/config.toml or ~/.repodepot/config.toml, \
            with --config layered on top.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Print the merged configuration with defaults filled in
    depot config show

    # Show which files were read
    depot config path"
    )]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        long_about = "Generate shell completion scripts for tab-completion.\n\n\
            Outputs a completion script for the specified shell.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Bash (add to ~/.bashrc)
    depot completion bash >> ~/.bashrc

    # Zsh (add to ~/.zshrc)
    depot completion zsh >> ~/.zshrc

    # Fish
    depot completion fish > ~/.config/fish/completions/depot.fish"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments naming a checkpoint distribution over a history file.
#[derive(clap::Args, Debug, Clone)]
pub struct HistoryArgs {
    /// JSON store export to read
    #[arg(long, value_name = "FILE")]
    pub history: PathBuf,

    /// Base path of the checkpoint distribution
    #[arg(long, default_value = "/")]
    pub base_path: String,

    /// Repository name; may be omitted when the history holds exactly one
    #[arg(long, value_name = "NAME")]
    pub repository: Option<String>,

    /// Print the rendered HTML page instead of a summary
    #[arg(long)]
    pub html: bool,
}

/// Checkpoint subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CheckpointAction {
    /// List checkpoint timestamps
    List {
        #[command(flatten)]
        history: HistoryArgs,
    },
    /// Resolve a path below the distribution's base path
    Resolve {
        #[command(flatten)]
        history: HistoryArgs,

        /// Path relative to the base path, e.g. `20240501T120000Z/`
        path: String,

        /// Resolve as of this instant (`YYYYMMDDTHHMMSSZ`) instead of now
        #[arg(long, value_parser = parse_instant)]
        now: Option<DateTime<Utc>>,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// List the files the configuration was read from
    Path,
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    CheckpointTimestamp::parse(s)
        .map(|ts| *ts.as_datetime())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resolve_parses_now() {
        let cli = Cli::try_parse_from([
            "depot",
            "checkpoint",
            "resolve",
            "--history",
            "h.json",
            "--base-path",
            "/cp",
            "20240501T120000Z",
            "--now",
            "20240502T000000Z",
        ])
        .unwrap();
        let Command::Checkpoint {
            action: CheckpointAction::Resolve { history, path, now },
        } = cli.command
        else {
            panic!("expected checkpoint resolve");
        };
        assert_eq!(history.base_path, "/cp");
        assert_eq!(path, "20240501T120000Z");
        assert_eq!(now.map(|n| n.to_rfc3339()), Some("2024-05-02T00:00:00+00:00".to_string()));
    }

    #[test]
    fn invalid_now_is_rejected() {
        let result = Cli::try_parse_from([
            "depot",
            "checkpoint",
            "resolve",
            "--history",
            "h.json",
            "x",
            "--now",
            "yesterday",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["depot", "config", "show", "--quiet", "--config", "c.toml"])
            .unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }
}
