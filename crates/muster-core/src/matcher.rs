//! Nearest-neighbour matching of a query embedding against the identity cache.

use crate::types::{Embedding, EmbeddingError, Identity, IdentityId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("cannot compare query with identity {identity}: {source}")]
    Embedding {
        identity: IdentityId,
        source: EmbeddingError,
    },
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone)]
pub enum MatchResult {
    /// The nearest identity lies within the threshold.
    Matched {
        identity: Arc<Identity>,
        distance: f32,
    },
    /// Nothing within the threshold. `distance` is the nearest distance seen,
    /// or `None` when no candidate produced a comparable distance.
    NoMatch { distance: Option<f32> },
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(
        &self,
        query: &Embedding,
        gallery: &[Arc<Identity>],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean distance matcher with a linear gallery scan.
///
/// The running minimum is replaced only on a strictly smaller distance, so on
/// exact ties the first candidate in gallery order wins. NaN distances are never
/// taken as a candidate. A query matches when the minimum is `<= threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        query: &Embedding,
        gallery: &[Arc<Identity>],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in gallery.iter().enumerate() {
            let distance = query
                .distance(&candidate.embedding)
                .map_err(|source| MatchError::Embedding {
                    identity: candidate.id,
                    source,
                })?;

            let is_better = match best {
                None => !distance.is_nan(),
                Some((_, best_distance)) => distance < best_distance,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        Ok(match best {
            Some((idx, distance)) if distance <= threshold => MatchResult::Matched {
                identity: Arc::clone(&gallery[idx]),
                distance,
            },
            Some((_, distance)) => MatchResult::NoMatch {
                distance: Some(distance),
            },
            None => MatchResult::NoMatch { distance: None },
        })
    }
}
