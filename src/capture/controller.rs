use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::camera::FrameSource;
use crate::error::{CaptureError, UnavailableReason};
use crate::metrics::MetricsCollector;
use crate::models::{Frame, Point};
use crate::settings::CaptureSettings;
use crate::submission::{
    draw_duration_secs, ClassificationResult, SpiralSubmitter, SubmissionPayload,
    SubmissionTarget,
};
use crate::tracking::{PointTracker, TrackerKind};

use super::loop_worker::{lock, FrameLoop, LoopContext, SharedCamera, SharedTracker};
use super::render::render_submission;
use super::state::{CaptureEvent, CaptureSession, CaptureStatus};
use super::GuideSpiral;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub session_id: Option<String>,
    pub status: CaptureStatus,
    pub tracker: TrackerKind,
    pub path_lengths: Vec<usize>,
    pub stroke_open: bool,
    pub last_point: Option<Point>,
    pub frame_sequence: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CaptureSnapshot {
    pub fn new(session: &CaptureSession, frame_sequence: Option<u64>) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            tracker: session.tracker,
            path_lengths: session.drawing.path_lengths(),
            stroke_open: session.drawing.is_stroke_open(),
            last_point: session.drawing.last_point(),
            frame_sequence,
            started_at: session.started_at,
            last_error: session.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub payload: SubmissionPayload,
    /// `None` when no scoring service is configured.
    pub classification: Option<ClassificationResult>,
}

/// Drives one capture session at a time against a camera and a tracker.
///
/// Cheap to clone; clones share the same session. The tracker outlives
/// sessions so its set-up cost is paid once.
#[derive(Clone)]
pub struct CaptureController {
    session: Arc<Mutex<CaptureSession>>,
    camera: SharedCamera,
    tracker: SharedTracker,
    last_frame: Arc<StdMutex<Option<Frame>>>,
    preview: Arc<StdMutex<Option<RgbaImage>>>,
    frame_loop: Arc<Mutex<FrameLoop>>,
    snapshots: Arc<watch::Sender<CaptureSnapshot>>,
    payload: Arc<Mutex<Option<SubmissionPayload>>>,
    submitter: Option<Arc<dyn SpiralSubmitter>>,
    metrics: MetricsCollector,
    settings: CaptureSettings,
}

impl CaptureController {
    pub fn new(
        camera: Box<dyn FrameSource>,
        tracker: PointTracker,
        settings: CaptureSettings,
    ) -> Self {
        let session = CaptureSession {
            tracker: tracker.kind(),
            ..CaptureSession::default()
        };
        let (snapshots, _) = watch::channel(CaptureSnapshot::new(&session, None));

        Self {
            session: Arc::new(Mutex::new(session)),
            camera: Arc::new(StdMutex::new(camera)),
            tracker: Arc::new(StdMutex::new(tracker)),
            last_frame: Arc::new(StdMutex::new(None)),
            preview: Arc::new(StdMutex::new(None)),
            frame_loop: Arc::new(Mutex::new(FrameLoop::new())),
            snapshots: Arc::new(snapshots),
            payload: Arc::new(Mutex::new(None)),
            submitter: None,
            metrics: MetricsCollector::new(),
            settings,
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn SpiralSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.snapshots.subscribe()
    }

    /// The last rendered preview canvas, if any frame has been processed.
    pub fn preview(&self) -> Option<RgbaImage> {
        lock(&self.preview).clone()
    }

    pub async fn get_session(&self) -> CaptureSession {
        self.session.lock().await.clone()
    }

    pub async fn cached_payload(&self) -> Option<SubmissionPayload> {
        self.payload.lock().await.clone()
    }

    pub async fn start_test(&self) -> Result<CaptureSnapshot> {
        {
            let mut session = self.session.lock().await;
            let kind = lock(&self.tracker).kind();
            let resolution = lock(&self.camera).resolution();
            let spiral = GuideSpiral::for_canvas(
                resolution.width,
                resolution.height,
                self.settings.spiral.turns,
                self.settings.spiral.angle_step,
            );
            session.begin(Uuid::new_v4().to_string(), kind, spiral)?;
            self.publish(&session);
        }

        lock(&self.tracker).reset();
        *lock(&self.last_frame) = None;
        *self.payload.lock().await = None;
        self.metrics.reset().await;

        if let Err(err) = self.open_camera().await {
            let mut session = self.session.lock().await;
            session.halt(err.clone());
            self.publish(&session);
            return Err(anyhow::Error::new(err).context("failed to open camera"));
        }

        self.frame_loop.lock().await.start(self.loop_context())?;

        let snapshot = self.snapshot();
        log_info!(
            "capture session {} started",
            snapshot.session_id.as_deref().unwrap_or("?")
        );
        Ok(snapshot)
    }

    /// Picks the marker color from the latest frame at `tap`.
    pub async fn calibrate(&self, tap: Point) -> Result<CaptureSnapshot> {
        let mut session = self.session.lock().await;
        session.check(CaptureEvent::Calibrate)?;

        let frame = lock(&self.last_frame)
            .clone()
            .ok_or(CaptureError::InvalidTransition {
                from: session.status,
                action: CaptureEvent::Calibrate.action(),
            })?;

        let tracker = Arc::clone(&self.tracker);
        tokio::task::spawn_blocking(move || lock(&tracker).calibrate(&frame, tap))
            .await
            .context("calibration worker join failed")??;

        session.calibrated()?;
        Ok(self.publish(&session))
    }

    pub async fn start_stroke(&self) -> Result<CaptureSnapshot> {
        self.start_stroke_at(Utc::now()).await
    }

    pub async fn start_stroke_at(&self, at: DateTime<Utc>) -> Result<CaptureSnapshot> {
        let mut session = self.session.lock().await;
        session.start_stroke(at)?;
        Ok(self.publish(&session))
    }

    pub async fn stop_stroke(&self) -> Result<CaptureSnapshot> {
        let mut session = self.session.lock().await;
        session.stop_stroke()?;
        Ok(self.publish(&session))
    }

    pub async fn submit(&self, target: &SubmissionTarget) -> Result<SubmissionReport> {
        self.submit_at(target, Utc::now()).await
    }

    /// Finishes the drawing, encodes it, and hands it to the scoring service.
    ///
    /// Encoding or delivery failures leave the session in `Finished`; call
    /// [`resubmit`](Self::resubmit) to try again.
    pub async fn submit_at(
        &self,
        target: &SubmissionTarget,
        at: DateTime<Utc>,
    ) -> Result<SubmissionReport> {
        {
            let mut session = self.session.lock().await;
            session.submit(at)?;
            self.publish(&session);
        }
        self.frame_loop.lock().await.stop().await?;
        self.deliver(target).await
    }

    pub async fn resubmit(&self, target: &SubmissionTarget) -> Result<SubmissionReport> {
        let status = self.session.lock().await.status;
        if status != CaptureStatus::Finished {
            return Err(CaptureError::InvalidTransition {
                from: status,
                action: "resubmit",
            }
            .into());
        }
        self.deliver(target).await
    }

    /// Scores a spiral drawn on paper and uploaded as a photo. The camera
    /// session is not involved; `started_at`/`stopped_at` come from a manual timer.
    pub async fn submit_paper(
        &self,
        target: &SubmissionTarget,
        image: Vec<u8>,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
    ) -> Result<SubmissionReport> {
        let duration = draw_duration_secs(Some(started_at), Some(stopped_at));
        let payload = tokio::task::spawn_blocking(move || {
            SubmissionPayload::paper(&image, duration, stopped_at)
        })
        .await
        .context("paper encoding worker join failed")??;
        self.send(target, payload).await
    }

    /// Discards the drawing and resumes drawing, reopening the camera only if it was closed.
    pub async fn clear(&self) -> Result<CaptureSnapshot> {
        let snapshot = {
            let mut session = self.session.lock().await;
            session.clear()?;
            self.publish(&session)
        };
        *self.payload.lock().await = None;

        let mut frame_loop = self.frame_loop.lock().await;
        if !frame_loop.is_running() {
            let was_open = lock(&self.camera).is_open();
            if !was_open {
                if let Err(err) = self.open_camera().await {
                    let mut session = self.session.lock().await;
                    session.halt(err.clone());
                    self.publish(&session);
                    return Err(anyhow::Error::new(err).context("failed to reopen camera"));
                }
            }
            frame_loop.start(self.loop_context())?;
        }
        Ok(snapshot)
    }

    /// Ends the session and releases the camera. Safe to call in any state.
    pub async fn stop(&self) -> Result<CaptureSnapshot> {
        self.frame_loop.lock().await.stop().await?;

        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || lock(&camera).close())
            .await
            .context("camera close worker join failed")?;

        *lock(&self.last_frame) = None;
        *self.payload.lock().await = None;

        let mut session = self.session.lock().await;
        if session.status != CaptureStatus::Idle {
            let id = session.id.clone().unwrap_or_default();
            session.stop()?;
            log_info!("capture session {id} stopped");
        }
        Ok(self.publish(&session))
    }

    pub fn camera_is_open(&self) -> bool {
        lock(&self.camera).is_open()
    }

    fn publish(&self, session: &CaptureSession) -> CaptureSnapshot {
        let sequence = self.snapshots.borrow().frame_sequence;
        let snapshot = CaptureSnapshot::new(session, sequence);
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }

    fn loop_context(&self) -> LoopContext {
        LoopContext {
            session: Arc::clone(&self.session),
            camera: Arc::clone(&self.camera),
            tracker: Arc::clone(&self.tracker),
            last_frame: Arc::clone(&self.last_frame),
            preview: Arc::clone(&self.preview),
            snapshots: Arc::clone(&self.snapshots),
            metrics: self.metrics.clone(),
            render: self.settings.render.clone(),
            interval: self.settings.camera.frame_interval(),
        }
    }

    async fn open_camera(&self) -> Result<(), CaptureError> {
        let camera = Arc::clone(&self.camera);
        match tokio::task::spawn_blocking(move || lock(&camera).open()).await {
            Ok(result) => result,
            Err(err) => {
                log_warn!("camera open worker failed: {err}");
                Err(CaptureError::DeviceUnavailable(UnavailableReason::StreamClosed))
            }
        }
    }

    async fn encode(&self) -> Result<SubmissionPayload, CaptureError> {
        let (drawing, spiral, method, duration, captured_at) = {
            let session = self.session.lock().await;
            (
                session.drawing.clone(),
                session.spiral,
                session.tracker.default_method(),
                session.draw_duration_secs(),
                session.stopped_at.unwrap_or_else(Utc::now),
            )
        };
        let resolution = lock(&self.last_frame)
            .as_ref()
            .map(Frame::resolution)
            .unwrap_or_else(|| lock(&self.camera).resolution());
        let render = self.settings.render.clone();

        tokio::task::spawn_blocking(move || {
            let canvas = render_submission(
                resolution.width,
                resolution.height,
                &spiral,
                &drawing,
                &render,
            );
            SubmissionPayload::encode(&canvas, duration, method, captured_at)
        })
        .await
        .map_err(|err| CaptureError::EncodingFailure(err.to_string()))?
    }

    async fn deliver(&self, target: &SubmissionTarget) -> Result<SubmissionReport> {
        let cached = self.payload.lock().await.clone();
        let payload = match cached {
            Some(payload) => payload,
            None => {
                let payload = self.encode().await?;
                *self.payload.lock().await = Some(payload.clone());
                payload
            }
        };
        self.send(target, payload).await
    }

    async fn send(
        &self,
        target: &SubmissionTarget,
        payload: SubmissionPayload,
    ) -> Result<SubmissionReport> {
        let Some(submitter) = &self.submitter else {
            log_info!(
                "no scoring service configured; payload ready ({} bytes, {}s, method {})",
                payload.image_len(),
                payload.draw_duration_secs,
                payload.method.code()
            );
            return Ok(SubmissionReport {
                payload,
                classification: None,
            });
        };

        match submitter.submit(target, &payload).await {
            Ok(result) => {
                log_info!("drawing classified as {}", result.majority_decision);
                Ok(SubmissionReport {
                    payload,
                    classification: Some(result),
                })
            }
            Err(err) => {
                log_warn!("submission failed, payload kept for retry: {err}");
                Err(err.into())
            }
        }
    }
}
