//! Enrollment: capture a bounded run of single-face samples for a new
//! identity and commit them to the gallery.
//!
//! A session owns the frame source from start to finish. Frames with zero or
//! several faces are skipped. The session commits once `target` samples are
//! in, or when the source runs dry or the deadline passes with at least
//! `minimum` samples. Cancelling never commits.

use gatewatch_capture::{EmbeddingOracle, Frame, FrameSource, SharedSource};
use gatewatch_core::{Embedding, GalleryStore};
use gatewatch_notify::{DispatchHandle, NotificationJob};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::feedback::FeedbackSink;

/// Longest single sleep while waiting between samples, so cancel stays responsive.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollSettings {
    pub target: usize,
    pub minimum: usize,
    pub sample_interval: Duration,
    pub timeout: Duration,
}

impl Default for EnrollSettings {
    fn default() -> Self {
        Self {
            target: 10,
            minimum: 8,
            sample_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Why a session ended without committing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    #[error("cancelled after {accepted} samples")]
    Cancelled { accepted: usize },
    #[error("not enough samples: captured {accepted}, need {required}")]
    Quality { accepted: usize, required: usize },
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("gallery write failed: {0}")]
    Storage(String),
}

/// Progress reported to the feedback sink.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentEvent {
    SampleCaptured {
        name: String,
        count: usize,
        target: usize,
    },
    Aborted {
        name: String,
        reason: AbortReason,
    },
    Committed {
        name: String,
        samples: usize,
    },
}

/// Terminal state of one session.
#[derive(Debug)]
pub enum EnrollmentOutcome {
    Committed {
        name: String,
        samples: usize,
        /// First accepted frame, for a confirmation snapshot.
        preview: Option<Frame>,
    },
    Aborted {
        name: String,
        reason: AbortReason,
    },
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("enrollment of {0:?} is already in progress")]
    Busy(String),
    #[error("a name is required to enroll")]
    EmptyName,
    #[error("{0:?} is already enrolled; remove it first")]
    AlreadyEnrolled(String),
    #[error("failed to spawn enrollment thread: {0}")]
    Spawn(std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum CaptureStop {
    TargetReached,
    Cancelled,
    Exhausted,
    TimedOut,
    Failed(String),
}

struct Capture {
    samples: Vec<Embedding>,
    preview: Option<Frame>,
    stop: CaptureStop,
}

/// Pull frames until the target is met or capture has to stop.
fn capture_samples(
    name: &str,
    source: &mut dyn FrameSource,
    oracle: &dyn EmbeddingOracle,
    feedback: &dyn FeedbackSink,
    settings: &EnrollSettings,
    cancel: &AtomicBool,
) -> Capture {
    let deadline = Instant::now() + settings.timeout;
    let mut samples = Vec::with_capacity(settings.target);
    let mut preview = None;

    let stop = loop {
        if samples.len() >= settings.target {
            break CaptureStop::TargetReached;
        }
        if cancel.load(Ordering::SeqCst) {
            break CaptureStop::Cancelled;
        }
        if Instant::now() >= deadline {
            break CaptureStop::TimedOut;
        }

        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => break CaptureStop::Exhausted,
            Err(e) => break CaptureStop::Failed(e.to_string()),
        };

        let mut faces = match oracle.detect(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "enroll: detection failed");
                continue;
            }
        };
        if faces.len() != 1 {
            tracing::debug!(
                sequence = frame.sequence,
                faces = faces.len(),
                "enroll: frame rejected, need exactly one face"
            );
            continue;
        }
        let Some(face) = faces.pop() else {
            continue;
        };

        samples.push(face.embedding);
        if preview.is_none() {
            preview = Some(frame);
        }
        feedback.notify(&EnrollmentEvent::SampleCaptured {
            name: name.to_string(),
            count: samples.len(),
            target: settings.target,
        });

        if samples.len() < settings.target {
            pause(settings.sample_interval, cancel);
        }
    };

    Capture {
        samples,
        preview,
        stop,
    }
}

/// Sleep for `duration`, returning early if `cancel` is raised.
fn pause(duration: Duration, cancel: &AtomicBool) {
    let until = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= until || cancel.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep((until - now).min(CANCEL_POLL));
    }
}

/// Run one full session: own the source, capture, then commit or abort.
pub fn run_session(
    name: &str,
    source: &SharedSource,
    oracle: &dyn EmbeddingOracle,
    feedback: &dyn FeedbackSink,
    store: &GalleryStore,
    settings: &EnrollSettings,
    cancel: &AtomicBool,
) -> EnrollmentOutcome {
    let capture = {
        let mut guard = source.acquire();
        tracing::info!(name, target = settings.target, "enrollment capturing");
        capture_samples(name, &mut **guard, oracle, feedback, settings, cancel)
    };
    let accepted = capture.samples.len();
    tracing::debug!(name, accepted, stop = ?capture.stop, "enrollment capture finished");

    let result = match capture.stop {
        CaptureStop::Cancelled => Err(AbortReason::Cancelled { accepted }),
        _ if accepted >= settings.minimum => store
            .append(name, capture.samples)
            .map_err(|e| AbortReason::Storage(e.to_string())),
        CaptureStop::Failed(e) => Err(AbortReason::Capture(e)),
        _ => Err(AbortReason::Quality {
            accepted,
            required: settings.minimum,
        }),
    };

    match result {
        Ok(()) => {
            feedback.notify(&EnrollmentEvent::Committed {
                name: name.to_string(),
                samples: accepted,
            });
            EnrollmentOutcome::Committed {
                name: name.to_string(),
                samples: accepted,
                preview: capture.preview,
            }
        }
        Err(reason) => {
            feedback.notify(&EnrollmentEvent::Aborted {
                name: name.to_string(),
                reason: reason.clone(),
            });
            EnrollmentOutcome::Aborted {
                name: name.to_string(),
                reason,
            }
        }
    }
}

struct ActiveSession {
    name: String,
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<EnrollmentOutcome>,
}

/// Starts, cancels and reaps enrollment sessions. At most one runs at a time.
pub struct EnrollmentController {
    store: Arc<GalleryStore>,
    source: SharedSource,
    oracle: Arc<dyn EmbeddingOracle>,
    feedback: Arc<dyn FeedbackSink>,
    dispatch: DispatchHandle,
    settings: EnrollSettings,
    active: Mutex<Option<ActiveSession>>,
}

impl EnrollmentController {
    pub fn new(
        store: Arc<GalleryStore>,
        source: SharedSource,
        oracle: Arc<dyn EmbeddingOracle>,
        feedback: Arc<dyn FeedbackSink>,
        dispatch: DispatchHandle,
        settings: EnrollSettings,
    ) -> Self {
        Self {
            store,
            source,
            oracle,
            feedback,
            dispatch,
            settings,
            active: Mutex::new(None),
        }
    }

    /// Start enrolling `name` on a dedicated thread.
    pub fn begin(&self, name: &str) -> Result<(), EnrollError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::EmptyName);
        }

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = active.as_ref() {
            if !session.thread.is_finished() {
                return Err(EnrollError::Busy(session.name.clone()));
            }
        }
        if let Some(finished) = active.take() {
            reap(finished);
        }

        if self.store.refreshed().contains(name) {
            return Err(EnrollError::AlreadyEnrolled(name.to_string()));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let thread = {
            let name = name.to_string();
            let cancel = Arc::clone(&cancel);
            let store = Arc::clone(&self.store);
            let source = self.source.clone();
            let oracle = Arc::clone(&self.oracle);
            let feedback = Arc::clone(&self.feedback);
            let dispatch = self.dispatch.clone();
            let settings = self.settings.clone();

            std::thread::Builder::new()
                .name("gatewatch-enroll".into())
                .spawn(move || {
                    let outcome = run_session(
                        &name,
                        &source,
                        oracle.as_ref(),
                        feedback.as_ref(),
                        &store,
                        &settings,
                        &cancel,
                    );
                    if let EnrollmentOutcome::Committed {
                        name,
                        samples,
                        preview,
                    } = &outcome
                    {
                        let image = preview.as_ref().and_then(Frame::snapshot);
                        let job = NotificationJob::with_image(
                            format!("New user enrolled: {name} ({samples} samples)"),
                            image,
                        );
                        if let Err(e) = dispatch.submit(job) {
                            tracing::warn!(error = %e, "enrollment confirmation not queued");
                        }
                    }
                    outcome
                })
                .map_err(EnrollError::Spawn)?
        };

        tracing::info!(name, "enrollment started");
        *active = Some(ActiveSession {
            name: name.to_string(),
            cancel,
            thread,
        });
        Ok(())
    }

    /// Ask the running session, if any, to stop without committing.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(session) if !session.thread.is_finished() => {
                session.cancel.store(true, Ordering::SeqCst);
                tracing::info!(name = %session.name, "enrollment cancel requested");
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.thread.is_finished())
    }

    /// Cancel any running session and wait for it. Blocks.
    pub fn shutdown(&self) -> Option<EnrollmentOutcome> {
        let session = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        session.cancel.store(true, Ordering::SeqCst);
        reap(session)
    }
}

fn reap(session: ActiveSession) -> Option<EnrollmentOutcome> {
    match session.thread.join() {
        Ok(outcome) => Some(outcome),
        Err(_) => {
            tracing::error!(name = %session.name, "enrollment thread panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face, faces_record, RecordingTransport};
    use gatewatch_capture::{FrameRecord, Manifest};
    use gatewatch_notify::Dispatcher;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingFeedback {
        events: Mutex<Vec<EnrollmentEvent>>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl RecordingFeedback {
        fn events(&self) -> Vec<EnrollmentEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl FeedbackSink for RecordingFeedback {
        fn notify(&self, event: &EnrollmentEvent) {
            self.events.lock().unwrap().push(event.clone());
            if let (EnrollmentEvent::SampleCaptured { count, .. }, Some((after, cancel))) =
                (event, &self.cancel_after)
            {
                if count == after {
                    cancel.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    fn fast_settings() -> EnrollSettings {
        EnrollSettings {
            sample_interval: Duration::ZERO,
            ..EnrollSettings::default()
        }
    }

    fn single_face_records(n: usize) -> Vec<FrameRecord> {
        (0..n).map(|i| faces_record(&[face(&[i as f32, 1.0])])).collect()
    }

    fn replay(records: Vec<FrameRecord>) -> (SharedSource, Arc<dyn EmbeddingOracle>) {
        let (source, oracle) = Manifest::from_records(".", records).into_replay(Duration::ZERO);
        (SharedSource::new(source), Arc::new(oracle))
    }

    fn run(
        records: Vec<FrameRecord>,
        feedback: &RecordingFeedback,
        store: &GalleryStore,
    ) -> EnrollmentOutcome {
        let (source, oracle) = replay(records);
        run_session(
            "alice",
            &source,
            oracle.as_ref(),
            feedback,
            store,
            &fast_settings(),
            &AtomicBool::new(false),
        )
    }

    #[test]
    fn test_seven_samples_do_not_commit() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("gallery.json")).unwrap();
        let feedback = RecordingFeedback::default();

        let outcome = run(single_face_records(7), &feedback, &store);

        match outcome {
            EnrollmentOutcome::Aborted { reason, .. } => assert_eq!(
                reason,
                AbortReason::Quality {
                    accepted: 7,
                    required: 8
                }
            ),
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(store.snapshot().is_empty());
        assert!(!tmp.path().join("gallery.json").exists());

        let events = feedback.events();
        assert_eq!(events.len(), 8);
        assert!(matches!(events[7], EnrollmentEvent::Aborted { .. }));
    }

    #[test]
    fn test_eight_samples_commit_exactly_eight() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("gallery.json")).unwrap();
        let feedback = RecordingFeedback::default();

        let outcome = run(single_face_records(8), &feedback, &store);

        match outcome {
            EnrollmentOutcome::Committed {
                samples, preview, ..
            } => {
                assert_eq!(samples, 8);
                assert_eq!(preview.map(|f| f.sequence), Some(0));
            }
            other => panic!("expected commit, got {other:?}"),
        }
        let gallery = store.snapshot();
        assert_eq!(gallery.get("alice").unwrap().samples().len(), 8);
        assert_eq!(
            feedback.events().last(),
            Some(&EnrollmentEvent::Committed {
                name: "alice".into(),
                samples: 8
            })
        );
    }

    #[test]
    fn test_stops_at_target() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("gallery.json")).unwrap();
        let (source, oracle) = replay(single_face_records(12));

        let outcome = run_session(
            "alice",
            &source,
            oracle.as_ref(),
            &RecordingFeedback::default(),
            &store,
            &fast_settings(),
            &AtomicBool::new(false),
        );

        assert!(matches!(outcome, EnrollmentOutcome::Committed { samples: 10, .. }));
        // The remaining frames are left for the detection loop.
        let next = source.acquire().read().unwrap().unwrap();
        assert_eq!(next.sequence, 10);
    }

    #[test]
    fn test_ambiguous_frames_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("gallery.json")).unwrap();

        let mut records = vec![
            faces_record(&[]),
            faces_record(&[face(&[9.0, 9.0]), face(&[8.0, 8.0])]),
        ];
        records.extend(single_face_records(8));

        let outcome = run(records, &RecordingFeedback::default(), &store);
        assert!(matches!(outcome, EnrollmentOutcome::Committed { samples: 8, .. }));

        let gallery = store.snapshot();
        let samples = gallery.get("alice").unwrap().samples();
        assert!(samples.iter().all(|s| s.values[1] == 1.0));
        assert_eq!(samples[0].values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_cancel_never_commits() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("gallery.json")).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let feedback = RecordingFeedback {
            cancel_after: Some((9, Arc::clone(&cancel))),
            ..RecordingFeedback::default()
        };
        let (source, oracle) = replay(single_face_records(20));

        let outcome = run_session(
            "alice",
            &source,
            oracle.as_ref(),
            &feedback,
            &store,
            &fast_settings(),
            &cancel,
        );

        match outcome {
            EnrollmentOutcome::Aborted { reason, .. } => {
                assert_eq!(reason, AbortReason::Cancelled { accepted: 9 })
            }
            other => panic!("expected cancel, got {other:?}"),
        }
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_at_commit_is_storage_abort() {
        let tmp = TempDir::new().unwrap();
        let store = GalleryStore::open(tmp.path().join("gallery.json")).unwrap();
        store
            .append("alice", vec![Embedding::new(vec![5.0, 5.0])])
            .unwrap();

        let outcome = run(single_face_records(10), &RecordingFeedback::default(), &store);
        assert!(matches!(
            outcome,
            EnrollmentOutcome::Aborted {
                reason: AbortReason::Storage(_),
                ..
            }
        ));
        assert_eq!(store.snapshot().get("alice").unwrap().samples().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_controller_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(GalleryStore::open(tmp.path().join("gallery.json")).unwrap());
        store
            .append("bob", vec![Embedding::new(vec![5.0, 5.0])])
            .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::spawn(transport.clone(), Duration::from_secs(5));
        let (source, oracle) = replay(single_face_records(40));

        let controller = Arc::new(EnrollmentController::new(
            Arc::clone(&store),
            source,
            oracle,
            Arc::new(RecordingFeedback::default()),
            dispatcher.handle(),
            EnrollSettings {
                sample_interval: Duration::from_secs(30),
                ..EnrollSettings::default()
            },
        ));

        assert!(matches!(controller.begin("  "), Err(EnrollError::EmptyName)));
        assert!(matches!(
            controller.begin("bob"),
            Err(EnrollError::AlreadyEnrolled(_))
        ));

        controller.begin("alice").unwrap();
        assert!(controller.is_active());
        assert!(matches!(controller.begin("carol"), Err(EnrollError::Busy(ref n)) if n == "alice"));

        assert!(controller.cancel());
        let c = Arc::clone(&controller);
        let outcome = tokio::task::spawn_blocking(move || c.shutdown())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(EnrollmentOutcome::Aborted {
                reason: AbortReason::Cancelled { .. },
                ..
            })
        ));
        assert!(!controller.is_active());
        assert!(!store.snapshot().contains("alice"));

        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert!(transport.messages().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reenroll_after_removal_by_another_process() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gallery.json");
        let store = Arc::new(GalleryStore::open(&path).unwrap());
        store
            .append("alice", vec![Embedding::new(vec![5.0, 5.0])])
            .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::spawn(transport.clone(), Duration::from_secs(5));
        let (source, oracle) = replay(single_face_records(10));
        let controller = Arc::new(EnrollmentController::new(
            Arc::clone(&store),
            source,
            oracle,
            Arc::new(RecordingFeedback::default()),
            dispatcher.handle(),
            fast_settings(),
        ));
        assert!(matches!(
            controller.begin("alice"),
            Err(EnrollError::AlreadyEnrolled(_))
        ));

        // `gatewatch remove alice` runs against the same file.
        GalleryStore::open(&path).unwrap().remove("alice").unwrap();

        controller.begin("alice").unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while controller.is_active() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let c = Arc::clone(&controller);
        let outcome = tokio::task::spawn_blocking(move || c.shutdown())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(EnrollmentOutcome::Committed { samples: 10, .. })
        ));

        let on_disk = GalleryStore::open(&path).unwrap().snapshot();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk.get("alice").unwrap().samples().len(), 10);
        dispatcher.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_commit_sends_confirmation() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(GalleryStore::open(tmp.path().join("gallery.json")).unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::spawn(transport.clone(), Duration::from_secs(5));
        let (source, oracle) = replay(single_face_records(10));

        let controller = Arc::new(EnrollmentController::new(
            Arc::clone(&store),
            source,
            oracle,
            Arc::new(RecordingFeedback::default()),
            dispatcher.handle(),
            fast_settings(),
        ));
        controller.begin("alice").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while controller.is_active() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let c = Arc::clone(&controller);
        let outcome = tokio::task::spawn_blocking(move || c.shutdown())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(EnrollmentOutcome::Committed { samples: 10, .. })
        ));
        assert!(store.snapshot().contains("alice"));

        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(
            transport.messages(),
            ["New user enrolled: alice (10 samples)"]
        );
    }
}
