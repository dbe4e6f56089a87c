//! In-memory mirror of every enrolled identity.
//!
//! Entries are held as `Arc<Identity>` and swapped whole, so a reader scanning
//! a snapshot sees either the previous or the new version of an identity,
//! never a mix of the two. Iteration order is ascending [`IdentityId`].

use crate::types::{Identity, IdentityId, MalformedRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of a full cache reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: RwLock<BTreeMap<IdentityId, Arc<Identity>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the cache and repopulate it from decoded store records.
    ///
    /// Malformed records are logged and skipped; they never abort the load.
    pub fn load<I>(&self, records: I) -> LoadReport
    where
        I: IntoIterator<Item = Result<Identity, MalformedRecord>>,
    {
        let mut fresh = BTreeMap::new();
        let mut report = LoadReport::default();

        for record in records {
            match record {
                Ok(identity) => {
                    fresh.insert(identity.id, Arc::new(identity));
                    report.loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        id = %err.id,
                        external_id = %err.external_id,
                        error = %err.source,
                        "skipping malformed identity record"
                    );
                    report.skipped += 1;
                }
            }
        }

        *self.entries.write() = fresh;
        report
    }

    /// Insert or replace the entry for `identity.id`.
    pub fn put(&self, identity: Identity) {
        let entry = Arc::new(identity);
        self.entries.write().insert(entry.id, entry);
    }

    /// Point-in-time copy of all entries in ascending id order.
    pub fn snapshot(&self) -> Vec<Arc<Identity>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Dimension of some identity other than `external_id` whose embedding
    /// length differs from `dimension`, if any.
    pub fn conflicting_dimension(&self, external_id: &str, dimension: usize) -> Option<usize> {
        self.entries
            .read()
            .values()
            .find(|e| e.external_id != external_id && e.embedding.len() != dimension)
            .map(|e| e.embedding.len())
    }
}
