//! gatewatch-core: Identity gallery, matching and alert throttling.
//!
//! Holds the enrolled embedding gallery, classifies live embeddings against
//! it by Euclidean nearest neighbour, and rate-limits the resulting alerts.

pub mod gallery;
pub mod matcher;
pub mod throttle;
pub mod types;

pub use gallery::{GalleryError, GalleryStore};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
pub use throttle::{CooldownPolicy, Throttle};
pub use types::{
    BoundingBox, ClassificationResult, Embedding, Gallery, Identification, Identity, UNKNOWN_LABEL,
};
