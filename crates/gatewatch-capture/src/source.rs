//! Frame sources and exclusive access to the shared capture device.

use crate::frame::Frame;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("failed to decode frame {sequence}: {source}")]
    Decode {
        sequence: u64,
        source: image::ImageError,
    },
}

/// Anything that yields frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).read()
    }
}

/// A frame source shared between the detection loop and enrollment.
///
/// Whoever holds the guard owns the device. The detection loop polls with
/// [`try_acquire`](Self::try_acquire) once per frame; an enrollment session
/// holds [`acquire`](Self::acquire) for its whole capture.
#[derive(Clone)]
pub struct SharedSource {
    inner: Arc<Mutex<Box<dyn FrameSource>>>,
}

pub type SourceGuard<'a> = MutexGuard<'a, Box<dyn FrameSource>>;

impl SharedSource {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(source))),
        }
    }

    /// Block until the source is free.
    pub fn acquire(&self) -> SourceGuard<'_> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the source if nobody else holds it.
    pub fn try_acquire(&self) -> Option<SourceGuard<'_>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
