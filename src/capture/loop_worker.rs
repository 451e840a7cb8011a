use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use image::RgbaImage;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::camera::FrameSource;
use crate::error::CaptureError;
use crate::metrics::{FrameMetrics, MetricsCollector};
use crate::models::{Frame, Point};
use crate::settings::RenderSettings;
use crate::tracking::{PointTracker, TrackingDegenerate};
use crate::utils::logging::debug_enabled;

use super::controller::CaptureSnapshot;
use super::render::render_preview;
use super::state::CaptureSession;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub type SharedCamera = Arc<StdMutex<Box<dyn FrameSource>>>;
pub type SharedTracker = Arc<StdMutex<PointTracker>>;

/// Locks a std mutex, taking the data back from a panicked holder.
pub(crate) fn lock<T: ?Sized>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Everything one run of the frame loop reads or writes.
#[derive(Clone)]
pub struct LoopContext {
    pub session: Arc<Mutex<CaptureSession>>,
    pub camera: SharedCamera,
    pub tracker: SharedTracker,
    pub last_frame: Arc<StdMutex<Option<Frame>>>,
    pub preview: Arc<StdMutex<Option<RgbaImage>>>,
    pub snapshots: Arc<watch::Sender<CaptureSnapshot>>,
    pub metrics: MetricsCollector,
    pub render: RenderSettings,
    pub interval: Duration,
}

struct Acquired {
    frame: Frame,
    tracked: Result<Point, TrackingDegenerate>,
    draws_marker: bool,
    mirrored: bool,
    acquire_ms: u64,
    track_ms: u64,
}

/// Acquire → track → accumulate → render, one frame at a time, until cancelled.
pub async fn capture_loop(ctx: LoopContext, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let verbose = debug_enabled();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match process_frame(&ctx, &cancel_token, verbose).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        if cancel_token.is_cancelled() {
                            log_warn!("frame worker failed during shutdown: {err:#}");
                        } else {
                            halt(&ctx, CaptureError::PipelineFailure(format!("{err:#}"))).await;
                        }
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("frame loop shutting down");
                break;
            }
        }
    }
}

/// Returns `Ok(false)` when the loop should end.
async fn process_frame(
    ctx: &LoopContext,
    cancel_token: &CancellationToken,
    verbose: bool,
) -> Result<bool> {
    let started = Instant::now();

    let acquired = tokio::task::spawn_blocking({
        let camera = Arc::clone(&ctx.camera);
        let tracker = Arc::clone(&ctx.tracker);
        move || -> Result<Acquired, CaptureError> {
            let acquire_start = Instant::now();
            let frame = lock(&camera).next_frame()?;
            let acquire_ms = acquire_start.elapsed().as_millis() as u64;

            let track_start = Instant::now();
            let mut tracker = lock(&tracker);
            let tracked = tracker.track_detailed(&frame);
            let track_ms = track_start.elapsed().as_millis() as u64;

            Ok(Acquired {
                frame,
                tracked,
                draws_marker: tracker.draws_marker(),
                mirrored: tracker.kind().mirrors_preview(),
                acquire_ms,
                track_ms,
            })
        }
    })
    .await
    .context("frame worker join failed")?;

    let acquired = match acquired {
        Ok(acquired) => acquired,
        Err(err) => {
            halt(ctx, err).await;
            return Ok(false);
        }
    };

    if cancel_token.is_cancelled() {
        log_debug!("discarding frame {} after cancellation", acquired.frame.sequence());
        return Ok(false);
    }

    let (spiral, drawing, appended) = {
        let mut session = ctx.session.lock().await;
        if !session.status.is_active() {
            return Ok(false);
        }
        *lock(&ctx.last_frame) = Some(acquired.frame.clone());
        session.frame_available();
        let appended = match acquired.tracked {
            Ok(point) => session.append_point(point),
            Err(_) => false,
        };
        (session.spiral, session.drawing.clone(), appended)
    };

    if verbose {
        if let Err(reason) = acquired.tracked {
            log_debug!("frame {}: no point ({reason:?})", acquired.frame.sequence());
        }
    }

    let render_start = Instant::now();
    let marker = if acquired.draws_marker {
        acquired.tracked.ok()
    } else {
        None
    };
    let render = ctx.render.clone();
    let mirrored = acquired.mirrored;
    let frame = acquired.frame;
    let (frame, canvas) = tokio::task::spawn_blocking(move || {
        let canvas = render_preview(&frame, mirrored, &spiral, &drawing, marker, &render);
        (frame, canvas)
    })
    .await
    .context("render worker join failed")?;
    let render_ms = render_start.elapsed().as_millis() as u64;

    if cancel_token.is_cancelled() {
        return Ok(false);
    }

    let sequence = frame.sequence();
    let timestamp = frame.captured_at();
    *lock(&ctx.preview) = Some(canvas);

    {
        let session = ctx.session.lock().await;
        if !session.status.is_active() {
            return Ok(false);
        }
        ctx.snapshots
            .send_replace(CaptureSnapshot::new(&session, Some(sequence)));
    }

    ctx.metrics
        .record_frame(FrameMetrics {
            timestamp,
            sequence,
            acquire_ms: acquired.acquire_ms,
            track_ms: acquired.track_ms,
            render_ms,
            total_ms: started.elapsed().as_millis() as u64,
            miss: acquired.tracked.err(),
            appended,
        })
        .await;

    Ok(true)
}

/// Fatal error: release the camera and drop the session back to idle.
async fn halt(ctx: &LoopContext, err: CaptureError) {
    log_error!("halting session: {err}");
    lock(&ctx.camera).close();
    *lock(&ctx.last_frame) = None;

    let mut session = ctx.session.lock().await;
    session.halt(err);
    ctx.snapshots
        .send_replace(CaptureSnapshot::new(&session, None));
}

/// Owns the running loop task, if any.
pub struct FrameLoop {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn start(&mut self, ctx: LoopContext) -> Result<()> {
        if self.is_running() {
            bail!("frame loop already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let handle = tokio::spawn(capture_loop(ctx, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("frame loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            if self.is_running() {
                log_warn!("frame loop dropped while running, cancelling");
            }
            token.cancel();
        }
    }
}
