//! Attendance marking: match, cooldown gate, ledger append.

use crate::store::{Store, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use muster_core::{
    AttendanceRecord, CooldownTracker, Embedding, EuclideanMatcher, Identity, IdentityCache,
    MatchError, MatchResult, Matcher,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a query produced no attendance decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// No identities are enrolled.
    EmptyRegistry,
    /// Nearest distance is above the threshold, or `None` when no candidate
    /// produced a comparable distance.
    NoMatch { distance: Option<f32> },
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Rejected(Rejection),
    /// Matched inside the cooldown window; nothing was written.
    Suppressed {
        identity: Arc<Identity>,
        distance: f32,
    },
    /// Matched and a new ledger record was committed.
    Marked {
        identity: Arc<Identity>,
        distance: f32,
        record: AttendanceRecord,
    },
}

pub struct AttendanceService {
    store: Arc<dyn Store>,
    cache: Arc<IdentityCache>,
    cooldown: CooldownTracker,
    matcher: EuclideanMatcher,
    threshold: f32,
    window: TimeDelta,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<IdentityCache>,
        threshold: f32,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            cooldown: CooldownTracker::new(),
            matcher: EuclideanMatcher,
            threshold,
            window: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Match `query` and, unless suppressed, append a ledger record at `now`.
    ///
    /// The cooldown check, the append and the cooldown update run under the
    /// matched identity's cooldown slot, so concurrent marks for one identity
    /// produce at most one `Marked` per window.
    pub async fn mark(
        &self,
        query: &Embedding,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Outcome, AttendanceError> {
        if self.cache.is_empty() {
            return Ok(Outcome::Rejected(Rejection::EmptyRegistry));
        }

        let gallery = self.cache.snapshot();
        let (identity, distance) =
            match self.matcher.best_match(query, &gallery, self.threshold)? {
                MatchResult::Matched { identity, distance } => (identity, distance),
                MatchResult::NoMatch { distance } => {
                    tracing::debug!(?distance, threshold = self.threshold, "query not recognized");
                    return Ok(Outcome::Rejected(Rejection::NoMatch { distance }));
                }
            };

        let mut slot = self.cooldown.acquire(identity.id).await;
        if slot.should_suppress(now, self.window) {
            tracing::debug!(
                external_id = %identity.external_id,
                distance,
                "mark suppressed by cooldown"
            );
            return Ok(Outcome::Suppressed { identity, distance });
        }

        let record = self
            .store
            .append_attendance(identity.id, now, source)
            .await?;
        slot.record(now);

        tracing::info!(
            external_id = %identity.external_id,
            record_id = record.id.0,
            distance,
            "attendance marked"
        );
        Ok(Outcome::Marked {
            identity,
            distance,
            record,
        })
    }
}
