//! Replay of a recorded capture session.
//!
//! A manifest is a JSON-lines file, one line per frame:
//!
//! ```text
//! {"image": "frames/0001.jpg", "faces": [{"bbox": {...}, "embedding": [0.01, ...]}]}
//! {"faces": []}
//! ```
//!
//! `image` is optional and resolved relative to the manifest; `faces` holds
//! the detections an external detector produced for that frame. Blank lines
//! and lines starting with `#` are ignored. The manifest splits into a
//! [`ReplaySource`] yielding the frames and a [`ManifestOracle`] answering
//! detection queries for them.

use crate::frame::Frame;
use crate::oracle::{Detection, EmbeddingOracle, OracleError};
use crate::source::{CaptureError, FrameSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("manifest line {line}: embedding dimension {got}, expected {want}")]
    DimensionMismatch { line: usize, got: usize, want: usize },
}

/// One recorded frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub faces: Vec<Detection>,
}

/// A parsed recording.
#[derive(Debug, Clone)]
pub struct Manifest {
    base_dir: PathBuf,
    records: Vec<FrameRecord>,
}

impl Manifest {
    /// Parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut records = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let record = serde_json::from_str(trimmed).map_err(|source| ManifestError::Parse {
                line: idx + 1,
                source,
            })?;
            records.push((idx + 1, record));
        }

        check_dimensions(&records)?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            frames = records.len(),
            "manifest loaded"
        );

        Ok(Self {
            base_dir,
            records: records.into_iter().map(|(_, r)| r).collect(),
        })
    }

    /// Build a manifest in memory. Image paths resolve against `base_dir`.
    pub fn from_records(base_dir: impl Into<PathBuf>, records: Vec<FrameRecord>) -> Self {
        Self {
            base_dir: base_dir.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Split into a paced frame source and the matching oracle. Frame
    /// sequence numbers are record indices.
    pub fn into_replay(self, frame_interval: Duration) -> (ReplaySource, ManifestOracle) {
        let mut images = Vec::with_capacity(self.records.len());
        let mut detections = HashMap::with_capacity(self.records.len());

        for (seq, record) in self.records.into_iter().enumerate() {
            images.push(record.image);
            if !record.faces.is_empty() {
                detections.insert(seq as u64, record.faces);
            }
        }

        let source = ReplaySource {
            base_dir: self.base_dir,
            images,
            next: 0,
            frame_interval,
            last_read: None,
        };
        (source, ManifestOracle { detections })
    }
}

fn check_dimensions(records: &[(usize, FrameRecord)]) -> Result<(), ManifestError> {
    let mut want: Option<usize> = None;
    for (line, record) in records {
        for face in &record.faces {
            let got = face.embedding.dim();
            match want {
                None => want = Some(got),
                Some(w) if w != got => {
                    return Err(ManifestError::DimensionMismatch {
                        line: *line,
                        got,
                        want: w,
                    })
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Yields recorded frames, paced at `frame_interval` like a live camera.
pub struct ReplaySource {
    base_dir: PathBuf,
    images: Vec<Option<PathBuf>>,
    next: usize,
    frame_interval: Duration,
    last_read: Option<Instant>,
}

impl FrameSource for ReplaySource {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(image) = self.images.get(self.next) else {
            return Ok(None);
        };
        let sequence = self.next as u64;
        self.next += 1;

        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());

        let frame = match image {
            Some(rel) => {
                let path = self.base_dir.join(rel);
                let decoded = image::open(&path)
                    .map_err(|source| CaptureError::Decode { sequence, source })?;
                Frame::from_rgb(decoded.to_rgb8(), sequence)
            }
            None => Frame::blank(sequence),
        };
        tracing::trace!(sequence, "replayed frame");
        Ok(Some(frame))
    }
}

/// Answers detection queries from the recorded detections.
pub struct ManifestOracle {
    detections: HashMap<u64, Vec<Detection>>,
}

impl EmbeddingOracle for ManifestOracle {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, OracleError> {
        Ok(self
            .detections
            .get(&frame.sequence)
            .cloned()
            .unwrap_or_default())
    }
}
