//! gatewatch-capture: Frame acquisition and the face-embedding boundary.
//!
//! Defines the frame source and embedding oracle interfaces the detection
//! loop and enrollment run against, plus a replay implementation of both
//! backed by a recorded capture session.

pub mod frame;
pub mod manifest;
pub mod oracle;
pub mod source;

pub use frame::{Frame, FrameError};
pub use manifest::{FrameRecord, Manifest, ManifestError, ManifestOracle, ReplaySource};
pub use oracle::{Detection, EmbeddingOracle, OracleError};
pub use source::{CaptureError, FrameSource, SharedSource, SourceGuard};
