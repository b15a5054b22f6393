//! Boundary to the face detection / embedding model.

use crate::frame::Frame;
use gatewatch_core::{BoundingBox, Embedding};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One detected face and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Produces face detections for a frame.
///
/// Always returns a list, possibly empty. Embedding dimension is constant for
/// a given oracle.
pub trait EmbeddingOracle: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, OracleError>;
}
