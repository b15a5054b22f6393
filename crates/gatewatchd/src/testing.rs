//! Shared fixtures for daemon tests.

use async_trait::async_trait;
use gatewatch_capture::{Detection, FrameRecord};
use gatewatch_core::{BoundingBox, Embedding};
use gatewatch_notify::{Transport, TransportError};
use std::sync::Mutex;

pub fn face(values: &[f32]) -> Detection {
    Detection {
        bbox: BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 40.0,
            height: 40.0,
            confidence: Some(0.99),
        },
        embedding: Embedding::new(values.to_vec()),
    }
}

pub fn faces_record(faces: &[Detection]) -> FrameRecord {
    FrameRecord {
        image: None,
        faces: faces.to_vec(),
    }
}

/// Transport that remembers every delivered message.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, message: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn send_image(&self, message: &str, _image: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}
