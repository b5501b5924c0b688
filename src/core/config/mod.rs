//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Explicit config file (`--config`)
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order, first hit wins:
//! 1. `$REPODEPOT_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/repodepot/config.toml`
//! 3. `~/.repodepot/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use repodepot::core::config::Config;
//!
//! let result = Config::load(None).unwrap();
//! let config = result.config;
//!
//! println!("Workers: {}", config.workers());
//! println!("Log filter: {}", config.log_filter());
//! ```

pub mod schema;

pub use schema::{CheckpointConfig, DepotConfig, LoggingConfig, TasksConfig};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an explicit global config file.
pub const CONFIG_ENV: &str = "REPODEPOT_CONFIG";

/// Default number of dispatcher workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default capacity of the dispatcher job channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Merged configuration from all sources.
///
/// Accessors apply defaults for anything left unset.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective file configuration after layering
    pub file: DepotConfig,
    /// Files that contributed, in the order they were applied
    sources: Vec<PathBuf>,
}

impl Config {
    /// Load configuration from default locations, then `explicit` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// holds invalid values, or if `explicit` cannot be read.
    /// Missing global config files are not an error (defaults are used).
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok(), dirs::home_dir(), explicit)
    }

    /// Load with injected environment and home directory.
    fn load_with(
        env: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
        explicit: Option<&Path>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();
        let mut sources = Vec::new();

        let mut file = match Self::find_global(&env, home, &mut warnings) {
            Some(path) => {
                let config = Self::read_config(&path)?;
                sources.push(path);
                config
            }
            None => DepotConfig::default(),
        };

        if let Some(path) = explicit {
            let config = Self::read_config(path)?;
            file = file.merge(config);
            sources.push(path.to_path_buf());
        }

        file.validate()?;

        Ok(ConfigLoadResult {
            config: Config { file, sources },
            warnings,
        })
    }

    /// Locate the global config file, if any.
    fn find_global(
        env: &impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
        warnings: &mut Vec<ConfigWarning>,
    ) -> Option<PathBuf> {
        // 1. Check $REPODEPOT_CONFIG
        if let Some(path) = env(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            warnings.push(ConfigWarning {
                message: format!("{} points to a missing file, ignoring it", CONFIG_ENV),
                path,
            });
        }

        // 2. Check $XDG_CONFIG_HOME/repodepot/config.toml
        if let Some(xdg_home) = env("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("repodepot/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 3. Check ~/.repodepot/config.toml
        if let Some(home) = home {
            let path = home.join(".repodepot/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Read and parse a config file.
    fn read_config(path: &Path) -> Result<DepotConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    /// Number of dispatcher workers.
    ///
    /// Defaults to [`DEFAULT_WORKERS`].
    pub fn workers(&self) -> usize {
        self.file
            .tasks
            .as_ref()
            .and_then(|t| t.workers)
            .unwrap_or(DEFAULT_WORKERS)
    }

    /// Capacity of the dispatcher job channel.
    ///
    /// Defaults to [`DEFAULT_QUEUE_CAPACITY`].
    pub fn queue_capacity(&self) -> usize {
        self.file
            .tasks
            .as_ref()
            .and_then(|t| t.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    /// Log filter directive.
    ///
    /// Defaults to `"info"`.
    pub fn log_filter(&self) -> &str {
        self.file
            .logging
            .as_ref()
            .and_then(|l| l.filter.as_deref())
            .unwrap_or("info")
    }

    /// Title used in rendered checkpoint listings, if overridden.
    pub fn listing_title(&self) -> Option<&str> {
        self.file
            .checkpoint
            .as_ref()
            .and_then(|c| c.listing_title.as_deref())
    }

    /// Files that contributed to this configuration.
    pub fn loaded_from(&self) -> &[PathBuf] {
        &self.sources
    }

    /// The configuration with every defaulted value filled in.
    pub fn effective(&self) -> DepotConfig {
        DepotConfig {
            tasks: Some(TasksConfig {
                workers: Some(self.workers()),
                queue_capacity: Some(self.queue_capacity()),
            }),
            logging: Some(LoggingConfig {
                filter: Some(self.log_filter().to_string()),
            }),
            checkpoint: Some(CheckpointConfig {
                listing_title: self.listing_title().map(str::to_string),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(vars: &[(&str, &Path)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.display().to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_empty_defaults() {
        let temp = TempDir::new().unwrap();
        let result = Config::load_with(env_of(&[]), Some(temp.path().to_path_buf()), None).unwrap();
        let config = result.config;

        assert_eq!(config.workers(), DEFAULT_WORKERS);
        assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.log_filter(), "info");
        assert!(config.listing_title().is_none());
        assert!(config.loaded_from().is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn load_global_from_env() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
            [tasks]
            workers = 9
            "#,
        )
        .unwrap();

        let result =
            Config::load_with(env_of(&[(CONFIG_ENV, &config_path)]), None, None).unwrap();

        assert_eq!(result.config.workers(), 9);
        assert_eq!(result.config.loaded_from(), &[config_path]);
    }

    #[test]
    fn missing_env_file_warns_and_falls_through() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        let home = temp.path().join("home");
        fs::create_dir_all(home.join(".repodepot")).unwrap();
        fs::write(home.join(".repodepot/config.toml"), "[logging]\nfilter = \"warn\"\n").unwrap();

        let result =
            Config::load_with(env_of(&[(CONFIG_ENV, &missing)]), Some(home), None).unwrap();

        assert_eq!(result.config.log_filter(), "warn");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].path, missing);
    }

    #[test]
    fn xdg_beats_home() {
        let temp = TempDir::new().unwrap();
        let xdg = temp.path().join("xdg");
        fs::create_dir_all(xdg.join("repodepot")).unwrap();
        fs::write(xdg.join("repodepot/config.toml"), "[tasks]\nworkers = 3\n").unwrap();
        let home = temp.path().join("home");
        fs::create_dir_all(home.join(".repodepot")).unwrap();
        fs::write(home.join(".repodepot/config.toml"), "[tasks]\nworkers = 5\n").unwrap();

        let result =
            Config::load_with(env_of(&[("XDG_CONFIG_HOME", &xdg)]), Some(home), None).unwrap();

        assert_eq!(result.config.workers(), 3);
    }

    #[test]
    fn explicit_file_layers_over_global() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        fs::create_dir_all(home.join(".repodepot")).unwrap();
        fs::write(
            home.join(".repodepot/config.toml"),
            "[tasks]\nworkers = 5\nqueue_capacity = 10\n",
        )
        .unwrap();
        let explicit = temp.path().join("local.toml");
        fs::write(&explicit, "[tasks]\nworkers = 1\n").unwrap();

        let result = Config::load_with(env_of(&[]), Some(home), Some(&explicit)).unwrap();

        assert_eq!(result.config.workers(), 1);
        assert_eq!(result.config.queue_capacity(), 10);
        assert_eq!(result.config.loaded_from().len(), 2);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("absent.toml");
        let result = Config::load_with(env_of(&[]), None, Some(&explicit));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn unknown_fields_rejected() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("config.toml");
        fs::write(&explicit, "unknown_field = true\n").unwrap();

        let result = Config::load_with(env_of(&[]), None, Some(&explicit));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("config.toml");
        fs::write(&explicit, "[tasks]\nworkers = 0\n").unwrap();

        let result = Config::load_with(env_of(&[]), None, Some(&explicit));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn effective_fills_defaults() {
        let config = Config::default();
        let effective = config.effective();
        assert!(effective.validate().is_ok());
        assert_eq!(
            effective.tasks,
            Some(TasksConfig {
                workers: Some(DEFAULT_WORKERS),
                queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            })
        );
        assert_eq!(effective.logging.and_then(|l| l.filter).as_deref(), Some("info"));
    }
}
