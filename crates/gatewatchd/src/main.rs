use anyhow::{Context, Result};
use gatewatch_capture::{EmbeddingOracle, Manifest, SharedSource};
use gatewatch_core::{GalleryStore, Throttle};
use gatewatch_notify::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod engine;
mod enroll;
mod feedback;
#[cfg(test)]
mod testing;

use config::Config;
use console::Command;
use engine::{spawn_detection_loop, Detector};
use enroll::{EnrollError, EnrollmentController};
use feedback::ConsoleFeedback;

/// How long the detection loop sleeps while enrollment owns the camera.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("gatewatchd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        gallery = %config.gallery_path.display(),
        manifest = %config.manifest_path.display(),
        transport = config.transport.kind(),
        tolerance = config.tolerance,
        "configuration loaded"
    );

    // A gallery that exists but cannot be read is fatal; a missing one is empty.
    let store = Arc::new(GalleryStore::open(&config.gallery_path).with_context(|| {
        format!(
            "failed to load gallery from {}",
            config.gallery_path.display()
        )
    })?);
    tracing::info!(users = store.snapshot().len(), "gallery loaded");

    let transport = config
        .transport
        .build(config.transport_timeout())
        .context("failed to build notification transport")?;
    let dispatcher = Dispatcher::spawn(transport, config.transport_timeout());

    let manifest = Manifest::load(&config.manifest_path).with_context(|| {
        format!(
            "failed to load capture manifest {}",
            config.manifest_path.display()
        )
    })?;
    tracing::info!(frames = manifest.len(), "capture manifest loaded");
    let (replay, oracle) = manifest.into_replay(config.frame_interval());
    let source = SharedSource::new(replay);
    let oracle: Arc<dyn EmbeddingOracle> = Arc::new(oracle);

    let detector = Detector {
        store: Arc::clone(&store),
        throttle: Arc::new(Throttle::new(config.cooldowns())),
        oracle: Arc::clone(&oracle),
        dispatch: dispatcher.handle(),
        tolerance: config.tolerance,
    };
    let mut detection = spawn_detection_loop(detector, source.clone(), IDLE_BACKOFF)?;

    let controller = Arc::new(EnrollmentController::new(
        Arc::clone(&store),
        source,
        oracle,
        Arc::new(ConsoleFeedback::new(config.feedback_bell)),
        dispatcher.handle(),
        config.enroll_settings(),
    ));

    let mut commands = console::spawn_reader();
    let mut console_open = true;

    tracing::info!("gatewatchd ready");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupt received");
                break;
            }
            _ = detection.finished() => {
                tracing::info!("frame source finished");
                break;
            }
            cmd = commands.recv(), if console_open => match cmd {
                Some(Command::Quit) => break,
                Some(cmd) => handle_command(&controller, &store, cmd),
                None => {
                    tracing::debug!("stdin closed; console disabled");
                    console_open = false;
                }
            },
        }
    }

    tracing::info!("gatewatchd shutting down");

    detection.stop();
    match tokio::task::spawn_blocking(move || detection.join()).await? {
        Ok(summary) => tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            alerts = summary.alerts,
            "detection stopped"
        ),
        Err(e) => tracing::error!(error = %e, "detection loop failed"),
    }

    let reaper = Arc::clone(&controller);
    if let Some(outcome) = tokio::task::spawn_blocking(move || reaper.shutdown()).await? {
        tracing::debug!(?outcome, "last enrollment session reaped");
    }

    let stats = dispatcher.shutdown(config.shutdown_grace()).await;
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "notifications flushed"
    );

    Ok(())
}

fn handle_command(controller: &EnrollmentController, store: &GalleryStore, cmd: Command) {
    match cmd {
        Command::Enroll(name) => match controller.begin(&name) {
            Ok(()) => println!("enrolling {name}; look at the camera"),
            Err(e @ (EnrollError::Busy(_) | EnrollError::AlreadyEnrolled(_))) => {
                println!("{e}")
            }
            Err(e) => tracing::error!(error = %e, "could not start enrollment"),
        },
        Command::Cancel => {
            if !controller.cancel() {
                println!("no enrollment in progress");
            }
        }
        Command::List => {
            let gallery = store.refreshed();
            if gallery.is_empty() {
                println!("no users enrolled");
            }
            for identity in gallery.identities() {
                println!("{} ({} samples)", identity.name(), identity.samples().len());
            }
        }
        Command::Quit => {}
    }
}
