//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Config File
//!
//! Located at (in order of precedence):
//! 1. `$REPODEPOT_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/repodepot/config.toml`
//! 3. `~/.repodepot/config.toml`
//!
//! A file named with `--config` is layered on top of whichever of those
//! was found.
//!
//! # Validation
//!
//! Config values are validated after parsing to ensure they are usable
//! (e.g., the worker pool cannot be empty).

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use super::ConfigError;

/// Top-level configuration file.
///
/// # Example
///
/// ```toml
/// [tasks]
/// workers = 4
/// queue_capacity = 256
///
/// [logging]
/// filter = "repodepot=debug,info"
///
/// [checkpoint]
/// listing_title = "Checkpoints"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DepotConfig {
    /// Task dispatcher settings
    pub tasks: Option<TasksConfig>,

    /// Log output settings
    pub logging: Option<LoggingConfig>,

    /// Checkpoint read path settings
    pub checkpoint: Option<CheckpointConfig>,
}

impl DepotConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tasks) = &self.tasks {
            tasks.validate()?;
        }
        if let Some(logging) = &self.logging {
            logging.validate()?;
        }
        Ok(())
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: DepotConfig) -> DepotConfig {
        DepotConfig {
            tasks: merge_section(self.tasks, other.tasks, TasksConfig::merge),
            logging: merge_section(self.logging, other.logging, |a, b| LoggingConfig {
                filter: b.filter.or(a.filter),
            }),
            checkpoint: merge_section(self.checkpoint, other.checkpoint, |a, b| {
                CheckpointConfig {
                    listing_title: b.listing_title.or(a.listing_title),
                }
            }),
        }
    }
}

fn merge_section<T>(base: Option<T>, over: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, over) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, b) => b.or(a),
    }
}

/// Task dispatcher settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TasksConfig {
    /// Number of worker tasks executing jobs
    pub workers: Option<usize>,

    /// Capacity of the channel between lock waiters and workers
    pub queue_capacity: Option<usize>,
}

impl TasksConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue(
                "tasks.workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidValue(
                "tasks.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn merge(self, other: TasksConfig) -> TasksConfig {
        TasksConfig {
            workers: other.workers.or(self.workers),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"repodepot=debug"`
    pub filter: Option<String>,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(filter) = &self.filter {
            EnvFilter::try_new(filter).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid logging filter '{}': {}", filter, e))
            })?;
        }
        Ok(())
    }
}

/// Checkpoint read path settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Title of the `<title>` element in rendered listings
    pub listing_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    mod depot_config {
        use super::*;

        #[test]
        fn defaults() {
            let config = DepotConfig::default();
            assert!(config.tasks.is_none());
            assert!(config.logging.is_none());
            assert!(config.checkpoint.is_none());
            assert!(config.validate().is_ok());
        }

        #[test]
        fn roundtrip() {
            let config = DepotConfig {
                tasks: Some(TasksConfig {
                    workers: Some(8),
                    queue_capacity: Some(64),
                }),
                logging: Some(LoggingConfig {
                    filter: Some("debug".to_string()),
                }),
                checkpoint: Some(CheckpointConfig {
                    listing_title: Some("Snapshots".to_string()),
                }),
            };

            let toml = toml::to_string_pretty(&config).unwrap();
            let parsed: DepotConfig = toml::from_str(&toml).unwrap();
            assert_eq!(config, parsed);
        }

        #[test]
        fn reject_unknown_fields() {
            let toml = r#"
                [tasks]
                workers = 2
                threads = 4
            "#;

            let result: Result<DepotConfig, _> = toml::from_str(toml);
            assert!(result.is_err());
        }

        #[test]
        fn merge_prefers_overlay() {
            let base = DepotConfig {
                tasks: Some(TasksConfig {
                    workers: Some(2),
                    queue_capacity: Some(16),
                }),
                logging: Some(LoggingConfig {
                    filter: Some("info".to_string()),
                }),
                checkpoint: None,
            };
            let overlay = DepotConfig {
                tasks: Some(TasksConfig {
                    workers: Some(6),
                    queue_capacity: None,
                }),
                logging: None,
                checkpoint: Some(CheckpointConfig {
                    listing_title: Some("cp".to_string()),
                }),
            };

            let merged = base.merge(overlay);
            let tasks = merged.tasks.unwrap();
            assert_eq!(tasks.workers, Some(6));
            assert_eq!(tasks.queue_capacity, Some(16));
            assert_eq!(merged.logging.unwrap().filter.as_deref(), Some("info"));
            assert_eq!(merged.checkpoint.unwrap().listing_title.as_deref(), Some("cp"));
        }
    }

    mod tasks_config {
        use super::*;

        #[test]
        fn zero_workers_rejected() {
            let config = TasksConfig {
                workers: Some(0),
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn zero_capacity_rejected() {
            let config = TasksConfig {
                queue_capacity: Some(0),
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn positive_values_accepted() {
            let config = TasksConfig {
                workers: Some(1),
                queue_capacity: Some(1),
            };
            assert!(config.validate().is_ok());
        }
    }

    mod logging_config {
        use super::*;

        #[test]
        fn valid_filter() {
            let config = LoggingConfig {
                filter: Some("repodepot=debug,warn".to_string()),
            };
            assert!(config.validate().is_ok());
        }

        #[test]
        fn invalid_filter() {
            let config = LoggingConfig {
                filter: Some("repodepot=loud".to_string()),
            };
            assert!(config.validate().is_err());
        }
    }
}
