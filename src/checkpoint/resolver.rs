//! checkpoint::resolver
//!
//! Map a requested timestamp to the checkpoint publication it denotes.
//!
//! # Rules
//!
//! 1. A timestamp that does not parse denotes nothing
//! 2. A timestamp later than now denotes nothing
//! 3. Otherwise it denotes the latest checkpoint at or before it, if any
//!
//! A request for exactly a checkpoint's timestamp is [`ResolvedCheckpoint::Exact`];
//! anything else that resolves is [`ResolvedCheckpoint::Canonical`] and
//! carries the timestamp the client should use instead.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use repodepot::checkpoint::{resolve, ResolveError};
//!
//! let err = resolve(&[], "20259928T092752Z", Utc::now()).unwrap_err();
//! assert!(matches!(err, ResolveError::NotFound(_)));
//! ```

use chrono::{DateTime, Utc};

use super::ResolveError;
use crate::core::model::Publication;
use crate::core::types::CheckpointTimestamp;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCheckpoint {
    /// The request named the checkpoint's own timestamp.
    Exact(Publication),
    /// The request fell between checkpoints; `canonical` is the one to use.
    Canonical {
        publication: Publication,
        canonical: CheckpointTimestamp,
    },
}

impl ResolvedCheckpoint {
    pub fn publication(&self) -> &Publication {
        match self {
            ResolvedCheckpoint::Exact(publication) => publication,
            ResolvedCheckpoint::Canonical { publication, .. } => publication,
        }
    }

    /// Timestamp of the resolved checkpoint.
    pub fn timestamp(&self) -> CheckpointTimestamp {
        CheckpointTimestamp::from_datetime(self.publication().created_at)
    }
}

/// Resolve `requested` against `history`.
///
/// `history` holds one repository's checkpoint publications in creation
/// order, which the store guarantees is strictly increasing by timestamp.
pub fn resolve(
    history: &[Publication],
    requested: &str,
    now: DateTime<Utc>,
) -> Result<ResolvedCheckpoint, ResolveError> {
    let requested_ts = CheckpointTimestamp::parse(requested)
        .map_err(|_| ResolveError::NotFound(format!("invalid checkpoint timestamp '{requested}'")))?;

    if requested_ts > CheckpointTimestamp::from_datetime(now) {
        return Err(ResolveError::NotFound(format!(
            "checkpoint {requested_ts} is in the future"
        )));
    }

    let after = history
        .partition_point(|p| CheckpointTimestamp::from_datetime(p.created_at) <= requested_ts);
    let publication = after
        .checked_sub(1)
        .and_then(|i| history.get(i))
        .cloned()
        .ok_or_else(|| {
            ResolveError::NotFound(format!("no checkpoint at or before {requested_ts}"))
        })?;

    let canonical = CheckpointTimestamp::from_datetime(publication.created_at);
    if canonical == requested_ts {
        Ok(ResolvedCheckpoint::Exact(publication))
    } else {
        Ok(ResolvedCheckpoint::Canonical {
            publication,
            canonical,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ChecksumType, CompressionType};
    use crate::core::types::{PublicationId, RepositoryId, VersionNumber};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn checkpoint(repo: RepositoryId, at: DateTime<Utc>) -> Publication {
        Publication {
            id: PublicationId::new(),
            repository: repo,
            version: VersionNumber::ZERO,
            checkpoint: true,
            created_at: at,
            checksum_type: ChecksumType::default(),
            repo_config: Default::default(),
            compression_type: CompressionType::default(),
        }
    }

    fn history(offsets: &[i64]) -> Vec<Publication> {
        let repo = RepositoryId::new();
        offsets
            .iter()
            .map(|s| checkpoint(repo, t0() + Duration::seconds(*s)))
            .collect()
    }

    fn ts(at: DateTime<Utc>) -> String {
        CheckpointTimestamp::from_datetime(at).to_string()
    }

    #[test]
    fn exact_match() {
        let h = history(&[0, 10, 20]);
        let resolved = resolve(&h, &ts(t0() + Duration::seconds(10)), t0() + Duration::hours(1)).unwrap();
        assert_eq!(resolved, ResolvedCheckpoint::Exact(h[1].clone()));
    }

    #[test]
    fn between_checkpoints_is_canonicalized_down() {
        let h = history(&[0, 10, 20]);
        let resolved = resolve(&h, &ts(t0() + Duration::seconds(15)), t0() + Duration::hours(1)).unwrap();
        assert_eq!(
            resolved,
            ResolvedCheckpoint::Canonical {
                publication: h[1].clone(),
                canonical: CheckpointTimestamp::from_datetime(h[1].created_at),
            }
        );
    }

    #[test]
    fn before_first_checkpoint_is_not_found() {
        let h = history(&[10]);
        assert!(resolve(&h, &ts(t0()), t0() + Duration::hours(1)).is_err());
    }

    #[test]
    fn empty_history_is_not_found() {
        assert!(resolve(&[], &ts(t0()), t0() + Duration::hours(1)).is_err());
    }

    #[test]
    fn future_is_not_found_but_now_is_fine() {
        let h = history(&[0]);
        let now = t0() + Duration::seconds(30);
        assert!(resolve(&h, &ts(now + Duration::seconds(1)), now).is_err());
        let resolved = resolve(&h, &ts(now), now).unwrap();
        assert_eq!(resolved.publication(), &h[0]);
    }

    #[test]
    fn subsecond_now_still_admits_its_own_second() {
        let h = history(&[0]);
        let now = t0() + Duration::milliseconds(900);
        assert!(matches!(
            resolve(&h, &ts(t0()), now),
            Ok(ResolvedCheckpoint::Exact(_))
        ));
    }

    #[test]
    fn invalid_timestamps_are_not_found() {
        let h = history(&[0]);
        let now = t0() + Duration::hours(1);
        for bad in ["invalid_ts", "20259928T092752Z", "20240501T120000", "20240501t120000Z", ""] {
            assert!(
                matches!(resolve(&h, bad, now), Err(ResolveError::NotFound(_))),
                "{bad} should not resolve"
            );
        }
    }

    fn linear(history: &[Publication], requested: CheckpointTimestamp) -> Option<usize> {
        history
            .iter()
            .enumerate()
            .filter(|(_, p)| CheckpointTimestamp::from_datetime(p.created_at) <= requested)
            .map(|(i, _)| i)
            .last()
    }

    proptest! {
        #[test]
        fn binary_search_agrees_with_linear_scan(
            gaps in prop::collection::vec(1i64..5_000, 0..40),
            probe in 0i64..250_000,
        ) {
            let mut offset = 0;
            let offsets: Vec<i64> = gaps.iter().map(|g| { offset += g; offset }).collect();
            let h = history(&offsets);
            let requested = CheckpointTimestamp::from_datetime(t0() + Duration::seconds(probe));
            let now = t0() + Duration::days(30);

            match (resolve(&h, &requested.to_string(), now), linear(&h, requested)) {
                (Ok(resolved), Some(i)) => {
                    prop_assert_eq!(resolved.publication(), &h[i]);
                    let exact = matches!(resolved, ResolvedCheckpoint::Exact(_));
                    prop_assert_eq!(exact, resolved.timestamp() == requested);
                }
                (Err(_), None) => {}
                (got, want) => prop_assert!(false, "resolver {:?} vs linear {:?}", got, want),
            }
        }
    }
}
