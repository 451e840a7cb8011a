use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::models::{Drawing, Point};
use crate::submission::draw_duration_secs;
use crate::tracking::TrackerKind;

use super::GuideSpiral;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStatus {
    /// Camera closed.
    #[default]
    Idle,
    /// Camera open requested, waiting for the first frame.
    Starting,
    Calibrating,
    Drawing,
    Finished,
}

impl CaptureStatus {
    /// States in which the frame loop runs.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CaptureStatus::Starting | CaptureStatus::Calibrating | CaptureStatus::Drawing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Start,
    FrameAvailable,
    Calibrate,
    StartStroke,
    StopStroke,
    Submit,
    Clear,
    Stop,
    Fault,
}

impl CaptureEvent {
    pub fn action(self) -> &'static str {
        match self {
            CaptureEvent::Start => "start",
            CaptureEvent::FrameAvailable => "accept a frame",
            CaptureEvent::Calibrate => "calibrate",
            CaptureEvent::StartStroke => "start a stroke",
            CaptureEvent::StopStroke => "stop a stroke",
            CaptureEvent::Submit => "submit",
            CaptureEvent::Clear => "clear",
            CaptureEvent::Stop => "stop",
            CaptureEvent::Fault => "fail",
        }
    }
}

/// The capture lifecycle as a pure function. `None` means the event is not
/// allowed in `status`.
pub fn next_status(
    status: CaptureStatus,
    event: CaptureEvent,
    tracker: TrackerKind,
) -> Option<CaptureStatus> {
    use CaptureEvent as E;
    use CaptureStatus as S;

    match (status, event) {
        (S::Idle, E::Start) => Some(S::Starting),
        (S::Starting, E::FrameAvailable) => Some(if tracker.needs_calibration() {
            S::Calibrating
        } else {
            S::Drawing
        }),
        (S::Calibrating, E::Calibrate) if tracker.needs_calibration() => Some(S::Drawing),
        (S::Drawing, E::Calibrate) if tracker.needs_calibration() => Some(S::Drawing),
        (S::Drawing, E::StartStroke | E::StopStroke) => Some(S::Drawing),
        (S::Drawing, E::Submit) => Some(S::Finished),
        (S::Drawing | S::Finished, E::Clear) => Some(S::Drawing),
        (S::Idle, E::Stop | E::Fault) => None,
        (_, E::Stop | E::Fault) => Some(S::Idle),
        _ => None,
    }
}

/// Everything one test run accumulates. Lives only in memory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub id: Option<String>,
    pub status: CaptureStatus,
    pub tracker: TrackerKind,
    /// Set by the first stroke.
    pub started_at: Option<DateTime<Utc>>,
    /// Set by submit.
    pub stopped_at: Option<DateTime<Utc>>,
    pub drawing: Drawing,
    pub spiral: GuideSpiral,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub fault: Option<CaptureError>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self {
            id: None,
            status: CaptureStatus::Idle,
            tracker: TrackerKind::Color,
            started_at: None,
            stopped_at: None,
            drawing: Drawing::new(),
            spiral: GuideSpiral::default(),
            last_error: None,
            fault: None,
        }
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, event: CaptureEvent) -> Result<CaptureStatus, CaptureError> {
        let next = next_status(self.status, event, self.tracker).ok_or(
            CaptureError::InvalidTransition {
                from: self.status,
                action: event.action(),
            },
        )?;
        self.status = next;
        Ok(next)
    }

    /// Checks `event` against the current state without applying it.
    pub fn check(&self, event: CaptureEvent) -> Result<CaptureStatus, CaptureError> {
        next_status(self.status, event, self.tracker).ok_or(CaptureError::InvalidTransition {
            from: self.status,
            action: event.action(),
        })
    }

    /// Replaces this (idle) session with a fresh one in `Starting`.
    pub fn begin(
        &mut self,
        id: String,
        tracker: TrackerKind,
        spiral: GuideSpiral,
    ) -> Result<(), CaptureError> {
        self.check(CaptureEvent::Start)?;
        *self = Self {
            id: Some(id),
            status: CaptureStatus::Starting,
            tracker,
            spiral,
            ..Self::default()
        };
        Ok(())
    }

    /// Moves out of `Starting` on the first frame. Later frames change nothing.
    pub fn frame_available(&mut self) -> CaptureStatus {
        if self.status == CaptureStatus::Starting {
            if let Ok(next) = self.apply(CaptureEvent::FrameAvailable) {
                return next;
            }
        }
        self.status
    }

    pub fn calibrated(&mut self) -> Result<(), CaptureError> {
        self.apply(CaptureEvent::Calibrate).map(|_| ())
    }

    /// Opens a new path, closing any path that is still open.
    pub fn start_stroke(&mut self, at: DateTime<Utc>) -> Result<(), CaptureError> {
        self.apply(CaptureEvent::StartStroke)?;
        if self.drawing.is_stroke_open() {
            self.drawing.stop_stroke();
        }
        self.started_at.get_or_insert(at);
        self.drawing.start_stroke();
        Ok(())
    }

    pub fn stop_stroke(&mut self) -> Result<(), CaptureError> {
        self.apply(CaptureEvent::StopStroke)?;
        self.drawing.stop_stroke();
        Ok(())
    }

    /// Adds a tracked point to the open path. Ignored outside `Drawing` or with the pen up.
    pub fn append_point(&mut self, point: Point) -> bool {
        self.status == CaptureStatus::Drawing && self.drawing.append(point)
    }

    pub fn submit(&mut self, at: DateTime<Utc>) -> Result<(), CaptureError> {
        self.apply(CaptureEvent::Submit)?;
        self.drawing.stop_stroke();
        self.stopped_at = Some(at);
        Ok(())
    }

    /// Throws the drawing away and goes back to `Drawing`.
    pub fn clear(&mut self) -> Result<(), CaptureError> {
        self.apply(CaptureEvent::Clear)?;
        self.drawing = Drawing::new();
        self.started_at = None;
        self.stopped_at = None;
        Ok(())
    }

    /// Ends the session. The caller releases the camera.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        self.check(CaptureEvent::Stop)?;
        *self = Self {
            tracker: self.tracker,
            ..Self::default()
        };
        Ok(())
    }

    /// Ends the session because of a fatal error, keeping the error for display.
    pub fn halt(&mut self, err: CaptureError) {
        let message = err.user_message();
        *self = Self {
            tracker: self.tracker,
            last_error: Some(message),
            fault: Some(err),
            ..Self::default()
        };
    }

    pub fn draw_duration_secs(&self) -> u64 {
        draw_duration_secs(self.started_at, self.stopped_at)
    }
}
