use chrono::{DateTime, Local};
use gatewatch_capture::{EmbeddingOracle, Frame, SharedSource};
use gatewatch_core::{
    ClassificationResult, EuclideanMatcher, GalleryStore, Identification, Matcher, Throttle,
};
use gatewatch_notify::{DispatchHandle, NotificationJob};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn detection thread: {0}")]
    Spawn(std::io::Error),
    #[error("detection thread panicked")]
    Panicked,
}

/// Why the detection loop stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoopExit {
    #[default]
    Stopped,
    EndOfStream,
    CaptureFailed(String),
}

/// Counters for one run of the detection loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub faces: u64,
    pub alerts: u64,
    pub exit: LoopExit,
}

/// Result of processing one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub results: Vec<ClassificationResult>,
    pub alerts: usize,
}

/// Everything the detection loop needs besides the frame source.
pub struct Detector {
    pub store: Arc<GalleryStore>,
    pub throttle: Arc<Throttle>,
    pub oracle: Arc<dyn EmbeddingOracle>,
    pub dispatch: DispatchHandle,
    pub tolerance: f32,
}

impl Detector {
    /// Classify every face in `frame` and queue an alert for each one whose
    /// throttle bucket is open.
    pub fn process_frame(&self, frame: &Frame) -> FrameReport {
        let detections = match self.oracle.detect(frame) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "detection failed; skipping frame");
                return FrameReport::default();
            }
        };
        if detections.is_empty() {
            return FrameReport::default();
        }

        let gallery = self.store.refreshed();
        let now = Instant::now();
        let mut snapshot: Option<Option<Vec<u8>>> = None;
        let mut report = FrameReport::default();

        for detection in detections {
            let identification =
                EuclideanMatcher.classify(&detection.embedding, &gallery, self.tolerance);
            tracing::debug!(
                sequence = frame.sequence,
                label = identification.label(),
                distance = ?identification.distance(),
                "face classified"
            );

            if self.throttle.should_send(
                identification.label(),
                identification.is_unknown(),
                now,
            ) {
                // Encode at most once per frame.
                let image = snapshot.get_or_insert_with(|| frame.snapshot()).clone();
                let job = NotificationJob::with_image(alert_message(&identification, Local::now()), image);
                match self.dispatch.submit(job) {
                    Ok(()) => report.alerts += 1,
                    Err(e) => tracing::warn!(error = %e, "alert not queued"),
                }
            }

            report.results.push(ClassificationResult {
                bbox: detection.bbox,
                identification,
            });
        }
        report
    }
}

/// Human-readable alert text.
pub fn alert_message(identification: &Identification, at: DateTime<Local>) -> String {
    let when = at.format("%Y-%m-%d %H:%M:%S");
    match identification {
        Identification::Known { name, distance } => {
            format!("{name} spotted at {when} (distance {distance:.2})")
        }
        Identification::Unknown => format!("Unknown person spotted at {when}"),
    }
}

/// Handle to the running detection thread.
pub struct DetectionHandle {
    stop: Arc<AtomicBool>,
    finished: watch::Receiver<bool>,
    thread: std::thread::JoinHandle<LoopSummary>,
}

impl DetectionHandle {
    /// Ask the loop to stop after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Resolves once the loop has exited, for whatever reason.
    pub async fn finished(&mut self) {
        let _ = self.finished.wait_for(|done| *done).await;
    }

    /// Wait for the thread and collect its summary. Blocks.
    pub fn join(self) -> Result<LoopSummary, EngineError> {
        self.thread.join().map_err(|_| EngineError::Panicked)
    }
}

/// Spawn the detection loop on a dedicated OS thread.
///
/// Each cycle takes the frame source if it is free, reads one frame and
/// processes it. While enrollment owns the source the loop idles for
/// `idle_backoff` between attempts.
pub fn spawn_detection_loop(
    detector: Detector,
    source: SharedSource,
    idle_backoff: Duration,
) -> Result<DetectionHandle, EngineError> {
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = watch::channel(false);

    let thread = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("gatewatch-detect".into())
            .spawn(move || {
                tracing::info!("detection loop started");
                let summary = run_loop(&detector, &source, &stop, idle_backoff);
                tracing::info!(
                    frames = summary.frames,
                    faces = summary.faces,
                    alerts = summary.alerts,
                    exit = ?summary.exit,
                    "detection loop exiting"
                );
                let _ = done_tx.send(true);
                summary
            })
            .map_err(EngineError::Spawn)?
    };

    Ok(DetectionHandle {
        stop,
        finished: done_rx,
        thread,
    })
}

fn run_loop(
    detector: &Detector,
    source: &SharedSource,
    stop: &AtomicBool,
    idle_backoff: Duration,
) -> LoopSummary {
    let mut summary = LoopSummary::default();
    let mut yielded = false;

    while !stop.load(Ordering::SeqCst) {
        let read = match source.try_acquire() {
            Some(mut guard) => guard.read(),
            None => {
                if !yielded {
                    tracing::debug!("frame source held by enrollment; detection paused");
                    yielded = true;
                }
                std::thread::sleep(idle_backoff);
                continue;
            }
        };
        if yielded {
            tracing::debug!("detection resumed");
            yielded = false;
        }

        match read {
            Ok(Some(frame)) => {
                let report = detector.process_frame(&frame);
                summary.frames += 1;
                summary.faces += report.results.len() as u64;
                summary.alerts += report.alerts as u64;
            }
            Ok(None) => {
                summary.exit = LoopExit::EndOfStream;
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed; stopping detection");
                summary.exit = LoopExit::CaptureFailed(e.to_string());
                break;
            }
        }
    }
    summary
}
