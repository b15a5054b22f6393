//! Frame type and snapshot encoding.

use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes). Empty when the
    /// source carries detections only.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u64,
}

impl Frame {
    /// Wrap an RGB image captured now.
    pub fn from_rgb(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// A frame with no pixel payload.
    pub fn blank(sequence: u64) -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    pub fn has_pixels(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.data.is_empty()
    }

    /// Encode the frame as JPEG for use as an alert attachment.
    pub fn to_jpeg(&self) -> Result<Vec<u8>, FrameError> {
        if !self.has_pixels() {
            return Err(FrameError::Empty);
        }
        let expected = (self.width as usize) * (self.height as usize) * 3;
        let image = RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )?;

        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
        Ok(buf)
    }

    /// Best-effort JPEG snapshot: `None` for blank frames or encoder failures.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        if !self.has_pixels() {
            return None;
        }
        match self.to_jpeg() {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(sequence = self.sequence, error = %e, "snapshot encoding failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has no pixel data")]
    Empty,
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("encode: {0}")]
    Encode(#[from] image::ImageError),
}
