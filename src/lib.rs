pub mod camera;
pub mod capture;
pub mod error;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod submission;
pub mod tracking;
pub mod utils;
pub mod vision;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use camera::FrameSource;
use capture::{CaptureController, CaptureStatus};
use error::as_capture_error;
use models::Point;
use settings::{settings_path, CaptureSettings, SettingsStore};
use submission::{ProcessSubmitter, SubmissionTarget};
use tracking::PointTracker;

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("spiral-capture starting up...");

    if let Err(err) = run_session() {
        error!("{err:#}");
        if let Some(capture_err) = as_capture_error(&err) {
            eprintln!("{}", capture_err.user_message());
        }
        std::process::exit(1);
    }
}

fn run_session() -> Result<()> {
    let store = SettingsStore::new(settings_path())?;
    let settings = store.capture();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(demo_session(settings))
}

#[cfg(feature = "native-camera")]
fn open_source(settings: &CaptureSettings) -> Box<dyn FrameSource> {
    Box::new(camera::NativeCamera::new(settings.camera.clone()))
}

#[cfg(not(feature = "native-camera"))]
fn open_source(settings: &CaptureSettings) -> Box<dyn FrameSource> {
    // Frames the marker rests at the spiral center before moving.
    const DEMO_REST_FRAMES: usize = 30;

    let resolution = settings.camera.resolution();
    let spiral = capture::GuideSpiral::for_canvas(
        resolution.width,
        resolution.height,
        settings.spiral.turns,
        settings.spiral.angle_step,
    );
    let rest = std::iter::repeat(spiral.center).take(DEMO_REST_FRAMES);
    let path = rest.chain(spiral.polyline().into_iter().step_by(3)).collect();

    Box::new(camera::SyntheticCamera::new(
        settings.camera.device_index,
        resolution,
        camera::DeviceRegistry::new(),
        camera::SyntheticScene {
            path,
            noise: 6,
            ..camera::SyntheticScene::default()
        },
    ))
}

/// Calibrate on the spiral center, trace one stroke, submit, stop.
async fn demo_session(settings: CaptureSettings) -> Result<()> {
    let tracker = PointTracker::color(&settings.color);
    let mut controller = CaptureController::new(open_source(&settings), tracker, settings.clone());
    if !settings.submission.command.is_empty() {
        controller = controller.with_submitter(Arc::new(ProcessSubmitter::new(
            settings.submission.command.clone(),
            settings.submission.timeout(),
        )));
    }

    let mut updates = controller.subscribe();
    controller.start_test().await?;

    tokio::time::timeout(
        STEP_TIMEOUT,
        updates.wait_for(|s| s.status != CaptureStatus::Starting && s.frame_sequence.is_some()),
    )
    .await
    .context("camera produced no frame")?
    .context("capture controller went away")?;

    let resolution = settings.camera.resolution();
    let center = Point::new(resolution.width as f32 / 2.0, resolution.height as f32 / 2.0);
    controller.calibrate(center).await?;
    controller.start_stroke().await?;

    let trace_frames = (settings.spiral.turns * std::f32::consts::TAU
        / settings.spiral.angle_step.max(f32::EPSILON)
        / 3.0) as u32;
    tokio::time::sleep(settings.camera.frame_interval() * trace_frames).await;

    controller.stop_stroke().await?;
    let result = controller.submit(&SubmissionTarget::Practice).await;

    let snapshot = controller.snapshot();
    info!(
        "captured {} point(s) in {} path(s)",
        snapshot.path_lengths.iter().sum::<usize>(),
        snapshot.path_lengths.len()
    );
    let metrics = controller.metrics().get_snapshot().await;
    info!(
        "frames: {} processed, {} tracked",
        metrics.frame_count, metrics.hit_count
    );

    match result {
        Ok(report) => match report.classification {
            Some(classification) => info!("classification: {}", classification.majority_decision),
            None => info!(
                "payload: {} byte PNG, {}s, method {}",
                report.payload.image_len(),
                report.payload.draw_duration_secs,
                report.payload.method.code()
            ),
        },
        Err(err) => warn!("submission failed: {err:#}"),
    }

    controller.stop().await?;
    Ok(())
}
