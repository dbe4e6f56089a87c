use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size in bytes of the little-endian `u32` length prefix of an embedding blob.
const BLOB_PREFIX_LEN: usize = 4;
const BLOB_VALUE_LEN: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding is empty")]
    Empty,
    #[error("embedding value at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding blob truncated: {len} bytes")]
    Truncated { len: usize },
    #[error("embedding blob declares {declared} values but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Store-assigned key of an enrolled identity. Stable for the identity's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Store-assigned key of an attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

/// Face feature vector produced by the external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reject embeddings that cannot take part in matching: empty vectors
    /// and vectors carrying NaN or infinities.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(EmbeddingError::NonFinite { index }),
            None => Ok(()),
        }
    }

    /// Euclidean distance between two embeddings of equal dimension.
    ///
    /// Both operands are summed in the same order, so the result is exactly
    /// symmetric and a vector's distance to itself is exactly `0.0`.
    pub fn distance(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        if self.values.len() != other.values.len() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: other.values.len(),
                actual: self.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Serialize as a little-endian `u32` value count followed by that many
    /// little-endian `f32` values.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(BLOB_PREFIX_LEN + self.values.len() * BLOB_VALUE_LEN);
        blob.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for v in &self.values {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        blob
    }

    /// Inverse of [`to_blob`](Self::to_blob). The decoded vector is validated.
    pub fn from_blob(blob: &[u8]) -> Result<Self, EmbeddingError> {
        if blob.len() < BLOB_PREFIX_LEN {
            return Err(EmbeddingError::Truncated { len: blob.len() });
        }
        let (prefix, body) = blob.split_at(BLOB_PREFIX_LEN);
        let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

        if body.len() % BLOB_VALUE_LEN != 0 || body.len() / BLOB_VALUE_LEN != declared {
            return Err(EmbeddingError::LengthMismatch {
                declared,
                actual: body.len() / BLOB_VALUE_LEN,
            });
        }

        let values = body
            .chunks_exact(BLOB_VALUE_LEN)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let embedding = Self { values };
        embedding.validate()?;
        Ok(embedding)
    }
}

/// An enrolled person with exactly one current embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Caller-facing identifier, unique across the registry.
    pub external_id: String,
    pub display_name: Option<String>,
    pub embedding: Embedding,
}

/// A persisted identity whose embedding blob failed to decode.
#[derive(Error, Debug, Clone)]
#[error("identity {id} ({external_id}) has a malformed embedding: {source}")]
pub struct MalformedRecord {
    pub id: IdentityId,
    pub external_id: String,
    pub source: EmbeddingError,
}

/// One entry of the append-only attendance ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub identity: IdentityId,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let vectors = [
            emb(&[0.0, 0.0, 0.0]),
            emb(&[1.0, -2.5, 3.25]),
            emb(&[1e-7, 1e7, -0.333_333]),
            emb(&[0.1; 128]),
        ];
        for v in &vectors {
            assert_eq!(v.distance(v).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_distance_symmetric() {
        let pairs = [
            (emb(&[1.0, 0.0]), emb(&[0.0, 1.0])),
            (emb(&[0.3, -0.7, 1.1]), emb(&[-0.2, 0.9, 0.05])),
            (emb(&[1e6, 1e-6]), emb(&[-1e6, 3.0])),
        ];
        for (a, b) in &pairs {
            assert_eq!(a.distance(b).unwrap(), b.distance(a).unwrap());
        }
    }

    #[test]
    fn test_distance_known_value() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[1.0, 2.0]);
        assert_eq!(
            a.distance(&b),
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_validate() {
        assert_eq!(emb(&[]).validate(), Err(EmbeddingError::Empty));
        assert_eq!(
            emb(&[0.0, f32::NAN]).validate(),
            Err(EmbeddingError::NonFinite { index: 1 })
        );
        assert_eq!(
            emb(&[f32::INFINITY]).validate(),
            Err(EmbeddingError::NonFinite { index: 0 })
        );
        assert!(emb(&[0.5, -0.5]).validate().is_ok());
    }

    #[test]
    fn test_blob_layout() {
        let blob = emb(&[1.0, -2.0]).to_blob();
        assert_eq!(blob.len(), 4 + 2 * 4);
        assert_eq!(&blob[..4], &2u32.to_le_bytes());
        assert_eq!(&blob[4..8], &1.0f32.to_le_bytes());
        assert_eq!(&blob[8..], &(-2.0f32).to_le_bytes());
    }

    #[test]
    fn test_blob_decode_preserves_values() {
        let original = emb(&[0.125, -3.5, 1e-3, 42.0]);
        let decoded = Embedding::from_blob(&original.to_blob()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_blob_truncated() {
        assert_eq!(
            Embedding::from_blob(&[1, 0]),
            Err(EmbeddingError::Truncated { len: 2 })
        );
    }

    #[test]
    fn test_blob_length_mismatch() {
        let mut blob = emb(&[1.0, 2.0, 3.0]).to_blob();
        blob.truncate(blob.len() - 4);
        assert_eq!(
            Embedding::from_blob(&blob),
            Err(EmbeddingError::LengthMismatch { declared: 3, actual: 2 })
        );

        // Trailing bytes that do not form a whole value.
        let mut blob = emb(&[1.0]).to_blob();
        blob.push(0);
        assert!(matches!(
            Embedding::from_blob(&blob),
            Err(EmbeddingError::LengthMismatch { declared: 1, .. })
        ));
    }

    #[test]
    fn test_blob_rejects_empty_and_non_finite() {
        assert_eq!(
            Embedding::from_blob(&0u32.to_le_bytes()),
            Err(EmbeddingError::Empty)
        );

        let mut blob = 1u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(
            Embedding::from_blob(&blob),
            Err(EmbeddingError::NonFinite { index: 0 })
        );
    }
}
