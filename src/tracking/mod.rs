//! Point trackers: turn one frame into one canvas point, or a reason why not.

mod color;
mod detector;
mod landmark;

pub use color::ColorTracker;
pub use detector::{
    DetectorStatus, HandLandmarkDetector, LandmarkService, SubprocessHandDetector,
};
pub use landmark::{landmarks, HandLandmarks, Landmark, LandmarkTracker};

use serde::Serialize;

use crate::error::CaptureError;
use crate::models::{Frame, Point};
use crate::settings::{ColorSettings, LandmarkSettings};
use crate::submission::SpiralMethod;

/// Why a frame produced no point. Recovered locally, never surfaced as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingDegenerate {
    NoContour,
    ZeroArea,
    NoHand,
    NotReady,
    Uncalibrated,
    OutOfFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackerKind {
    Color,
    Landmark,
}

impl TrackerKind {
    /// Method code the scoring service expects for drawings made with this tracker.
    pub fn default_method(self) -> SpiralMethod {
        match self {
            TrackerKind::Color => SpiralMethod::AirDraw,
            TrackerKind::Landmark => SpiralMethod::Webcam,
        }
    }

    pub fn needs_calibration(self) -> bool {
        matches!(self, TrackerKind::Color)
    }

    /// The landmark view is shown selfie-style, so the preview is flipped.
    pub fn mirrors_preview(self) -> bool {
        matches!(self, TrackerKind::Landmark)
    }
}

pub enum PointTracker {
    Color(ColorTracker),
    Landmark(LandmarkTracker),
}

impl PointTracker {
    pub fn color(settings: &ColorSettings) -> Self {
        PointTracker::Color(ColorTracker::new(settings.clone()))
    }

    pub fn landmark(service: LandmarkService, settings: &LandmarkSettings) -> Self {
        PointTracker::Landmark(LandmarkTracker::new(service, settings))
    }

    pub fn kind(&self) -> TrackerKind {
        match self {
            PointTracker::Color(_) => TrackerKind::Color,
            PointTracker::Landmark(_) => TrackerKind::Landmark,
        }
    }

    pub fn draws_marker(&self) -> bool {
        match self {
            PointTracker::Color(tracker) => tracker.draws_marker(),
            PointTracker::Landmark(_) => false,
        }
    }

    /// Color tracker only. The landmark tracker has nothing to calibrate.
    pub fn calibrate(&mut self, frame: &Frame, point: Point) -> Result<(), CaptureError> {
        match self {
            PointTracker::Color(tracker) => tracker.calibrate(frame, point).map(|_| ()),
            PointTracker::Landmark(_) => Ok(()),
        }
    }

    /// Forgets any calibration so the next session has to pick a color again.
    pub fn reset(&mut self) {
        if let PointTracker::Color(tracker) = self {
            tracker.clear_calibration();
        }
    }

    pub fn track_detailed(&mut self, frame: &Frame) -> Result<Point, TrackingDegenerate> {
        match self {
            PointTracker::Color(tracker) => tracker.track_detailed(frame),
            PointTracker::Landmark(tracker) => tracker.track_detailed(frame),
        }
    }

    pub fn track(&mut self, frame: &Frame) -> Option<Point> {
        self.track_detailed(frame).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_method_codes() {
        assert_eq!(TrackerKind::Color.default_method(), SpiralMethod::AirDraw);
        assert_eq!(TrackerKind::Landmark.default_method(), SpiralMethod::Webcam);
        assert!(TrackerKind::Color.needs_calibration());
        assert!(!TrackerKind::Landmark.needs_calibration());
        assert!(TrackerKind::Landmark.mirrors_preview());
    }
}
