use serde::{Deserialize, Serialize};

use crate::models::{Frame, Point};
use crate::settings::LandmarkSettings;

use super::detector::LandmarkService;
use super::TrackingDegenerate;

/// Keypoint indices of the 21-point hand model.
pub mod landmarks {
    pub const WRIST: usize = 0;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_FINGER_MCP: usize = 5;
    pub const INDEX_FINGER_TIP: usize = 8;
    pub const MIDDLE_FINGER_TIP: usize = 12;
    pub const RING_FINGER_TIP: usize = 16;
    pub const PINKY_TIP: usize = 20;
    pub const COUNT: usize = 21;
}

/// One keypoint, normalized to `[0, 1]` of the frame. `z` is depth relative to the wrist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    pub landmarks: [Landmark; landmarks::COUNT],
    pub confidence: f32,
    /// "Left" or "Right" as reported by the detector.
    pub handedness: String,
}

impl HandLandmarks {
    /// Returns `None` unless exactly 21 landmarks are given.
    pub fn new(landmarks: Vec<Landmark>, confidence: f32, handedness: impl Into<String>) -> Option<Self> {
        let landmarks = landmarks.try_into().ok()?;
        Some(Self {
            landmarks,
            confidence,
            handedness: handedness.into(),
        })
    }
}

/// Maps a detected fingertip to canvas pixels, mirrored horizontally.
pub struct LandmarkTracker {
    service: LandmarkService,
    fingertip: usize,
    min_confidence: f32,
}

impl LandmarkTracker {
    pub fn new(service: LandmarkService, settings: &LandmarkSettings) -> Self {
        Self {
            service,
            fingertip: settings.fingertip_index,
            min_confidence: settings.min_confidence,
        }
    }

    pub fn service(&self) -> &LandmarkService {
        &self.service
    }

    pub fn track_detailed(&mut self, frame: &Frame) -> Result<Point, TrackingDegenerate> {
        let hands = match self.service.detect(frame) {
            Ok(Some(hands)) => hands,
            Ok(None) => return Err(TrackingDegenerate::NotReady),
            Err(err) => {
                log::warn!("hand detection failed on frame {}: {err:#}", frame.sequence());
                return Err(TrackingDegenerate::NotReady);
            }
        };

        let tip = hands
            .iter()
            .find(|hand| hand.confidence >= self.min_confidence)
            .and_then(|hand| hand.landmarks.get(self.fingertip))
            .ok_or(TrackingDegenerate::NoHand)?;

        mirror_to_canvas(*tip, frame.width(), frame.height()).ok_or(TrackingDegenerate::OutOfFrame)
    }

    pub fn track(&mut self, frame: &Frame) -> Option<Point> {
        self.track_detailed(frame).ok()
    }
}

/// `((1 - x) * width, y * height)`, kept only when it lands inside the canvas.
pub fn mirror_to_canvas(landmark: Landmark, width: u32, height: u32) -> Option<Point> {
    let x = (1.0 - landmark.x) * width as f32;
    let y = landmark.y * height as f32;
    Point::within(x, y, width, height)
}
