//! Persistent gallery store.
//!
//! The gallery lives in one JSON document holding two parallel lists: the
//! per-identity embedding lists and the identity names. Every mutation
//! re-reads the document, then rewrites it whole (temp file + rename) before
//! the new state is published to readers, so a reader's snapshot is always
//! either the state before a write or the state after it. Other processes
//! (the CLI) may edit the same file; [`GalleryStore::refresh`] picks their
//! changes up.

use crate::types::{Embedding, Gallery, Identity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;
use thiserror::Error;

const GALLERY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to read gallery file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write gallery file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("identity {0:?} has no samples")]
    NoSamples(String),
    #[error("identity {0:?} is already enrolled")]
    Duplicate(String),
    #[error("identity {0:?} is not enrolled")]
    NotFound(String),
    #[error("embedding dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },
}

/// On-disk layout: `(encodings, names)` as two parallel lists.
#[derive(Serialize, Deserialize)]
struct GalleryFile {
    version: u32,
    encodings: Vec<Vec<Embedding>>,
    names: Vec<String>,
}

/// Load a gallery from `path`. A missing file is an empty gallery.
pub fn load(path: &Path) -> Result<Gallery, GalleryError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Gallery::default()),
        Err(source) => {
            return Err(GalleryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let corrupt = |reason: String| GalleryError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file: GalleryFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

    if file.version != GALLERY_FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", file.version)));
    }
    if file.encodings.len() != file.names.len() {
        return Err(corrupt(format!(
            "{} embedding lists for {} names",
            file.encodings.len(),
            file.names.len()
        )));
    }

    {
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = file.names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(corrupt(format!("identity {dup:?} appears more than once")));
        }
    }

    let identities = file
        .names
        .into_iter()
        .zip(file.encodings)
        .map(|(name, samples)| {
            if samples.is_empty() {
                tracing::warn!(name = %name, "stored identity has no samples; it will never match");
            }
            Identity { name, samples }
        })
        .collect();

    Ok(Gallery { identities })
}

/// Persist `gallery` to `path` atomically: write a sibling temp file, flush it
/// to disk, then rename over the target.
pub fn save(path: &Path, gallery: &Gallery) -> Result<(), GalleryError> {
    let write_err = |source| GalleryError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = GalleryFile {
        version: GALLERY_FORMAT_VERSION,
        encodings: gallery.identities.iter().map(|i| i.samples.clone()).collect(),
        names: gallery.identities.iter().map(|i| i.name.clone()).collect(),
    };
    let bytes = serde_json::to_vec(&file)
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let temp_path = path.with_extension("json.part");
    let written = write_synced(&temp_path, &bytes).and_then(|()| fs::rename(&temp_path, path));
    if let Err(source) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(source));
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut out = fs::File::create(path)?;
    out.write_all(bytes)?;
    out.sync_all()
}

/// What the file looked like when we last read or wrote it. `None` is a
/// missing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Shared, persisted gallery.
///
/// Readers take cheap `Arc` snapshots. Writers are serialized and publish a
/// new snapshot only after the durable write succeeded.
pub struct GalleryStore {
    path: PathBuf,
    current: RwLock<Arc<Gallery>>,
    /// Serializes writers; holds the stamp of the file state last published.
    writer: Mutex<Option<FileStamp>>,
}

impl GalleryStore {
    /// Open the store at `path`, loading any persisted gallery.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let path = path.into();
        let stamp = file_stamp(&path);
        let gallery = load(&path)?;
        tracing::info!(
            path = %path.display(),
            identities = gallery.len(),
            "gallery loaded"
        );
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(gallery)),
            writer: Mutex::new(stamp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current committed gallery.
    pub fn snapshot(&self) -> Arc<Gallery> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the file if it changed since this store last read or wrote it,
    /// and publish the result. Returns the current snapshot.
    ///
    /// A file that fails to load is remembered, so the error is reported once
    /// per change rather than on every call.
    pub fn refresh(&self) -> Result<Arc<Gallery>, GalleryError> {
        let mut seen = self.lock_writer();
        if file_stamp(&self.path) == *seen {
            return Ok(self.snapshot());
        }
        let gallery = self.reload(&mut seen)?;
        tracing::info!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery changed on disk; reloaded"
        );
        Ok(gallery)
    }

    /// Like [`refresh`](Self::refresh), but keeps serving the last good
    /// snapshot when the file cannot be loaded.
    pub fn refreshed(&self) -> Arc<Gallery> {
        self.refresh().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "gallery reload failed; keeping last good state");
            self.snapshot()
        })
    }

    /// Enroll a new identity and persist the whole gallery.
    ///
    /// Names are unique: re-enrolling an existing name fails with
    /// [`GalleryError::Duplicate`]; call [`remove`](Self::remove) first.
    pub fn append(&self, name: &str, samples: Vec<Embedding>) -> Result<(), GalleryError> {
        let mut seen = self.lock_writer();
        let base = self.reload(&mut seen)?;

        if name.trim().is_empty() {
            return Err(GalleryError::EmptyName);
        }
        let Some(first) = samples.first() else {
            return Err(GalleryError::NoSamples(name.to_string()));
        };
        if base.contains(name) {
            return Err(GalleryError::Duplicate(name.to_string()));
        }
        let want = base.dim().unwrap_or(first.dim());
        if let Some(bad) = samples.iter().find(|s| s.dim() != want) {
            return Err(GalleryError::DimensionMismatch {
                got: bad.dim(),
                want,
            });
        }

        let mut next = Gallery::clone(&base);
        next.identities.push(Identity {
            name: name.to_string(),
            samples,
        });

        self.commit(next, &mut seen)?;
        tracing::info!(name, "identity appended to gallery");
        Ok(())
    }

    /// Delete an identity and persist the whole gallery.
    pub fn remove(&self, name: &str) -> Result<Identity, GalleryError> {
        let mut seen = self.lock_writer();
        let base = self.reload(&mut seen)?;

        let idx = base
            .identities
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| GalleryError::NotFound(name.to_string()))?;

        let mut next = Gallery::clone(&base);
        let removed = next.identities.remove(idx);

        self.commit(next, &mut seen)?;
        tracing::info!(name, "identity removed from gallery");
        Ok(removed)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<FileStamp>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the file as it is now and publish it. Caller holds the writer lock.
    fn reload(&self, seen: &mut Option<FileStamp>) -> Result<Arc<Gallery>, GalleryError> {
        // Stamp before reading: a write racing with the load shows up as a
        // change on the next refresh.
        *seen = file_stamp(&self.path);
        let gallery = Arc::new(load(&self.path)?);
        self.publish(Arc::clone(&gallery));
        Ok(gallery)
    }

    /// Persist `next`, then publish it. Caller holds the writer lock.
    fn commit(&self, next: Gallery, seen: &mut Option<FileStamp>) -> Result<(), GalleryError> {
        save(&self.path, &next)?;
        *seen = file_stamp(&self.path);
        self.publish(Arc::new(next));
        Ok(())
    }

    fn publish(&self, gallery: Arc<Gallery>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = gallery;
    }
}
