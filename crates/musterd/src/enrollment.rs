//! Enrollment: upsert an identity's embedding into the store, then the cache.

use crate::store::{Store, StoreError, Upserted};
use muster_core::{Embedding, EmbeddingError, IdentityCache};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("external id must not be empty")]
    MissingExternalId,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(#[from] EmbeddingError),
    #[error("embedding has {actual} dimensions but enrolled identities have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct EnrollmentService {
    store: Arc<dyn Store>,
    cache: Arc<IdentityCache>,
    /// Serializes commit + cache put so cache order follows commit order.
    write_lock: Mutex<()>,
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<IdentityCache>) -> Self {
        Self {
            store,
            cache,
            write_lock: Mutex::new(()),
        }
    }

    /// Create or overwrite the identity for `external_id`.
    ///
    /// The embedding is always replaced; the display name only when a
    /// non-blank one is given. The cache is updated only after the store
    /// commit succeeds.
    pub async fn enroll(
        &self,
        external_id: &str,
        display_name: Option<&str>,
        embedding: Embedding,
    ) -> Result<Upserted, EnrollError> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(EnrollError::MissingExternalId);
        }
        embedding.validate()?;
        let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());

        let _guard = self.write_lock.lock().await;

        if let Some(expected) = self
            .cache
            .conflicting_dimension(external_id, embedding.len())
        {
            return Err(EnrollError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let upserted = self
            .store
            .upsert_identity(external_id, display_name, &embedding)
            .await?;
        self.cache.put(upserted.identity.clone());

        tracing::info!(
            id = %upserted.identity.id,
            external_id,
            created = upserted.created,
            "identity enrolled"
        );
        Ok(upserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use muster_core::Identity;

    async fn service() -> (EnrollmentService, Arc<IdentityCache>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let cache = Arc::new(IdentityCache::new());
        (EnrollmentService::new(store, Arc::clone(&cache)), cache)
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn cached_entry(cache: &IdentityCache, external_id: &str) -> Option<Arc<Identity>> {
        cache
            .snapshot()
            .into_iter()
            .find(|e| e.external_id == external_id)
    }

    #[tokio::test]
    async fn test_enroll_populates_cache() {
        let (service, cache) = service().await;
        let upserted = service
            .enroll("U1", Some("Ada"), emb(&[1.0, 0.0]))
            .await
            .unwrap();

        assert!(upserted.created);
        let cached = cached_entry(&cache, "U1").unwrap();
        assert_eq!(cached.external_id, "U1");
        assert_eq!(cached.display_name.as_deref(), Some("Ada"));
        assert_eq!(cached.embedding, emb(&[1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_reenroll_overwrites_embedding_and_keeps_name() {
        let (service, cache) = service().await;
        let first = service
            .enroll("U1", Some("Ada"), emb(&[1.0, 0.0]))
            .await
            .unwrap();
        let second = service.enroll("U1", Some("   "), emb(&[0.0, 1.0])).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.identity.id, first.identity.id);
        assert_eq!(cache.len(), 1);

        let cached = cached_entry(&cache, "U1").unwrap();
        assert_eq!(cached.embedding, emb(&[0.0, 1.0]));
        assert_eq!(cached.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_rejects_bad_input_without_touching_cache() {
        let (service, cache) = service().await;

        assert!(matches!(
            service.enroll("  ", None, emb(&[1.0])).await,
            Err(EnrollError::MissingExternalId)
        ));
        assert!(matches!(
            service.enroll("U1", None, emb(&[])).await,
            Err(EnrollError::InvalidEmbedding(EmbeddingError::Empty))
        ));
        assert!(matches!(
            service.enroll("U1", None, emb(&[f32::NAN])).await,
            Err(EnrollError::InvalidEmbedding(EmbeddingError::NonFinite { index: 0 }))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_dimension_conflict() {
        let (service, cache) = service().await;
        service.enroll("U1", None, emb(&[1.0, 0.0])).await.unwrap();

        let err = service
            .enroll("U2", None, emb(&[1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrollError::DimensionMismatch { expected: 2, actual: 3 }
        ));
        assert_eq!(cache.len(), 1);

        // The sole identity may change its own dimension.
        service
            .enroll("U1", None, emb(&[1.0, 0.0, 0.0]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_external_id_is_trimmed() {
        let (service, cache) = service().await;
        service.enroll(" U1 ", None, emb(&[1.0])).await.unwrap();
        service.enroll("U1", None, emb(&[2.0])).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.snapshot()[0].external_id, "U1");
    }
}
