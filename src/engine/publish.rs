//! engine::publish
//!
//! Publication settings and staging.
//!
//! Settings a publish request leaves unset fall back to the repository's
//! stored values. Resolution happens once at validation time, so a
//! repository reconfigured while the task waits does not change what the
//! task publishes. Autopublish uses the repository values unchanged.

use std::collections::BTreeMap;

use crate::core::model::{ChecksumType, CompressionType, RepositoryConfig};
use crate::core::store::{StagedPublication, Transaction};
use crate::core::types::{PublicationId, RepositoryId, VersionNumber};

use super::task::PublishRequest;

/// Effective settings of one publication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSettings {
    pub checksum_type: ChecksumType,
    pub repo_config: BTreeMap<String, String>,
    pub compression_type: CompressionType,
}

impl PublishSettings {
    /// The repository's stored defaults.
    pub fn repository_defaults(config: &RepositoryConfig) -> Self {
        Self {
            checksum_type: config.checksum_type,
            repo_config: config.repo_config.clone(),
            compression_type: config.compression_type,
        }
    }

    /// Request values where given, repository values otherwise.
    pub fn resolve(request: &PublishRequest, config: &RepositoryConfig) -> Self {
        Self {
            checksum_type: request.checksum_type.unwrap_or(config.checksum_type),
            repo_config: request
                .repo_config
                .clone()
                .unwrap_or_else(|| config.repo_config.clone()),
            compression_type: request.compression_type.unwrap_or(config.compression_type),
        }
    }

    /// Stage a publication of `repository` at `version` with these settings.
    pub fn stage(
        &self,
        txn: &mut Transaction,
        repository: RepositoryId,
        version: VersionNumber,
        checkpoint: bool,
    ) -> PublicationId {
        let id = PublicationId::new();
        txn.stage_publication(StagedPublication {
            id,
            repository,
            version,
            checkpoint,
            checksum_type: self.checksum_type,
            repo_config: self.repo_config.clone(),
            compression_type: self.compression_type,
        });
        id
    }
}
