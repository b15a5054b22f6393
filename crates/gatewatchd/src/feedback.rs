//! User-facing acknowledgement during enrollment.

use crate::enroll::EnrollmentEvent;
use std::io::Write;

/// Receives enrollment progress. Fire-and-forget: implementations swallow
/// their own failures.
pub trait FeedbackSink: Send + Sync {
    fn notify(&self, event: &EnrollmentEvent);
}

/// Logs progress and optionally rings the terminal bell per captured sample.
pub struct ConsoleFeedback {
    bell: bool,
}

impl ConsoleFeedback {
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }
}

impl FeedbackSink for ConsoleFeedback {
    fn notify(&self, event: &EnrollmentEvent) {
        match event {
            EnrollmentEvent::SampleCaptured {
                name,
                count,
                target,
            } => {
                tracing::info!(name = %name, "captured {count}/{target}");
                if self.bell {
                    let mut err = std::io::stderr();
                    let _ = err.write_all(b"\x07");
                    let _ = err.flush();
                }
            }
            EnrollmentEvent::Aborted { name, reason } => {
                tracing::warn!(name = %name, reason = %reason, "enrollment aborted; user not added");
            }
            EnrollmentEvent::Committed { name, samples } => {
                tracing::info!(name = %name, samples, "user added and gallery saved");
            }
        }
    }
}
