//! engine::policy
//!
//! Sync policy resolution and validation.
//!
//! # Architecture
//!
//! A sync request may name a policy explicitly, set the legacy `mirror`
//! flag, or do neither. [`resolve`] collapses those inputs into one
//! [`SyncPolicy`] with a fixed precedence table, and [`validate`] rejects
//! combinations of policy and repository settings that cannot be honored.
//! Both run once, before a task is queued.
//!
//! # Precedence
//!
//! | `sync_policy` | `mirror`     | result            |
//! |---------------|--------------|-------------------|
//! | `Some(p)`     | any          | `p`               |
//! | `None`        | `Some(true)` | `MirrorComplete`  |
//! | `None`        | otherwise    | `Additive`        |
//!
//! # Example
//!
//! ```
//! use repodepot::core::model::{RepositoryConfig, SyncPolicy};
//! use repodepot::engine::policy;
//!
//! let policy = policy::resolve(None, Some(true));
//! assert_eq!(policy, SyncPolicy::MirrorComplete);
//!
//! let config = RepositoryConfig { autopublish: true, ..Default::default() };
//! let err = policy::validate(policy, &config, &[]).unwrap_err();
//! assert!(err.to_string().contains("'autopublish'"));
//! ```

use thiserror::Error;

pub use crate::core::model::SyncPolicy;
use crate::core::model::RepositoryConfig;
use crate::core::types::ContentKind;

/// A repository setting or request option incompatible with a policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// Incompatible with any mirroring policy.
    #[error(
        "Cannot use '{field}' in combination with a 'mirror_complete' or 'mirror_content_only' sync policy."
    )]
    ConflictsWithMirror {
        /// The offending setting
        field: &'static str,
    },

    /// Incompatible with `mirror_complete` only.
    #[error("Cannot use '{field}' in combination with a 'mirror_complete' sync policy.")]
    ConflictsWithMirrorComplete {
        /// The offending setting
        field: &'static str,
    },
}

/// Resolve the effective policy from the request.
pub fn resolve(sync_policy: Option<SyncPolicy>, mirror: Option<bool>) -> SyncPolicy {
    match (sync_policy, mirror) {
        (Some(policy), _) => policy,
        (None, Some(true)) => SyncPolicy::MirrorComplete,
        (None, _) => SyncPolicy::Additive,
    }
}

/// Check a resolved policy against repository settings and skipped kinds.
///
/// # Errors
///
/// - `retain_package_versions > 0` with any mirroring policy
/// - `autopublish` with `mirror_complete`
/// - non-empty `skip_types` with `mirror_complete`
pub fn validate(
    policy: SyncPolicy,
    config: &RepositoryConfig,
    skip_types: &[ContentKind],
) -> Result<(), PolicyError> {
    if policy.is_mirror() && config.retain_package_versions > 0 {
        return Err(PolicyError::ConflictsWithMirror {
            field: "retain_package_versions",
        });
    }

    if policy == SyncPolicy::MirrorComplete {
        if config.autopublish {
            return Err(PolicyError::ConflictsWithMirrorComplete {
                field: "autopublish",
            });
        }
        if !skip_types.is_empty() {
            return Err(PolicyError::ConflictsWithMirrorComplete {
                field: "skip_types",
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod resolution {
        use super::*;

        #[test]
        fn explicit_policy_wins_over_mirror() {
            assert_eq!(
                resolve(Some(SyncPolicy::Additive), Some(true)),
                SyncPolicy::Additive
            );
            assert_eq!(
                resolve(Some(SyncPolicy::MirrorContentOnly), Some(false)),
                SyncPolicy::MirrorContentOnly
            );
        }

        #[test]
        fn mirror_flag_selects_mirror_complete() {
            assert_eq!(resolve(None, Some(true)), SyncPolicy::MirrorComplete);
        }

        #[test]
        fn default_is_additive() {
            assert_eq!(resolve(None, None), SyncPolicy::Additive);
            assert_eq!(resolve(None, Some(false)), SyncPolicy::Additive);
        }
    }

    mod validation {
        use super::*;

        fn retaining() -> RepositoryConfig {
            RepositoryConfig {
                retain_package_versions: 2,
                ..Default::default()
            }
        }

        #[test]
        fn retain_package_versions_conflicts_with_both_mirrors() {
            for policy in [SyncPolicy::MirrorComplete, SyncPolicy::MirrorContentOnly] {
                let err = validate(policy, &retaining(), &[]).unwrap_err();
                assert_eq!(
                    err.to_string(),
                    "Cannot use 'retain_package_versions' in combination with a \
                     'mirror_complete' or 'mirror_content_only' sync policy."
                );
            }
            assert!(validate(SyncPolicy::Additive, &retaining(), &[]).is_ok());
        }

        #[test]
        fn autopublish_conflicts_with_mirror_complete_only() {
            let config = RepositoryConfig {
                autopublish: true,
                ..Default::default()
            };
            let err = validate(SyncPolicy::MirrorComplete, &config, &[]).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Cannot use 'autopublish' in combination with a 'mirror_complete' sync policy."
            );
            assert!(validate(SyncPolicy::MirrorContentOnly, &config, &[]).is_ok());
            assert!(validate(SyncPolicy::Additive, &config, &[]).is_ok());
        }

        #[test]
        fn skip_types_conflicts_with_mirror_complete_only() {
            let skip = vec![ContentKind::new("srpm").unwrap()];
            let config = RepositoryConfig::default();
            assert_eq!(
                validate(SyncPolicy::MirrorComplete, &config, &skip),
                Err(PolicyError::ConflictsWithMirrorComplete {
                    field: "skip_types"
                })
            );
            assert!(validate(SyncPolicy::MirrorContentOnly, &config, &skip).is_ok());
        }

        #[test]
        fn plain_repository_accepts_every_policy() {
            let config = RepositoryConfig::default();
            for policy in [
                SyncPolicy::Additive,
                SyncPolicy::MirrorComplete,
                SyncPolicy::MirrorContentOnly,
            ] {
                assert!(validate(policy, &config, &[]).is_ok());
            }
        }
    }
}
