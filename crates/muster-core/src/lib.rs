//! muster-core: identity matching and attendance cooldown engine.
//!
//! Holds the in-memory identity cache, the nearest-neighbour matcher and the
//! per-identity cooldown tracker. Persistence and feature extraction live
//! outside this crate and are reached through [`FaceExtractor`] and the
//! daemon's store.

pub mod cache;
pub mod cooldown;
pub mod extract;
pub mod matcher;
pub mod types;

pub use cache::{IdentityCache, LoadReport};
pub use cooldown::{CooldownSlot, CooldownTracker};
pub use extract::{ExtractError, FaceExtractor};
pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher};
pub use types::{
    AttendanceRecord, Embedding, EmbeddingError, Identity, IdentityId, MalformedRecord, RecordId,
};
