use crate::error::CaptureError;
use crate::models::{Frame, Point};
use crate::settings::ColorSettings;
use crate::vision::{self, HsvWindow};

use super::TrackingDegenerate;

/// Follows a colored marker by hue.
///
/// Pipeline per frame: HSV threshold, open, close, external contours,
/// largest contour by area, centroid from moments.
#[derive(Debug, Clone)]
pub struct ColorTracker {
    settings: ColorSettings,
    target_hue: Option<u8>,
}

impl ColorTracker {
    pub fn new(settings: ColorSettings) -> Self {
        Self {
            settings,
            target_hue: None,
        }
    }

    pub fn target_hue(&self) -> Option<u8> {
        self.target_hue
    }

    pub fn is_calibrated(&self) -> bool {
        self.target_hue.is_some()
    }

    pub fn draws_marker(&self) -> bool {
        self.settings.draw_marker
    }

    /// Stores the hue under `point` as the new target. Replaces any earlier calibration.
    pub fn calibrate(&mut self, frame: &Frame, point: Point) -> Result<u8, CaptureError> {
        let inside = Point::within(point.x, point.y, frame.width(), frame.height()).ok_or(
            CaptureError::CalibrationOutOfFrame {
                x: point.x,
                y: point.y,
            },
        )?;
        let (x, y) = inside.to_pixel(frame.width(), frame.height());
        let hue = vision::hsv_at(frame.image(), x, y).h;
        self.target_hue = Some(hue);
        log::info!("calibrated marker hue {hue} at ({x}, {y})");
        Ok(hue)
    }

    pub fn clear_calibration(&mut self) {
        self.target_hue = None;
    }

    pub fn window(&self) -> Option<HsvWindow> {
        self.target_hue.map(|target_hue| HsvWindow {
            target_hue,
            tolerance: self.settings.hue_tolerance,
            min_saturation: self.settings.min_saturation,
            min_value: self.settings.min_value,
        })
    }

    pub fn track_detailed(&self, frame: &Frame) -> Result<Point, TrackingDegenerate> {
        let window = self.window().ok_or(TrackingDegenerate::Uncalibrated)?;

        let mask = vision::threshold_mask(frame.image(), &window);
        let mask = vision::open(&mask, self.settings.kernel_size);
        let mask = vision::close(&mask, self.settings.kernel_size);

        let contours = vision::find_external_contours(&mask);
        if contours.is_empty() {
            return Err(TrackingDegenerate::NoContour);
        }

        // Strictly greater keeps the first contour on ties.
        let mut best = &contours[0];
        let mut best_area = best.area();
        for contour in &contours[1..] {
            let area = contour.area();
            if area > best_area {
                best = contour;
                best_area = area;
            }
        }
        if best_area <= 0.0 {
            return Err(TrackingDegenerate::ZeroArea);
        }

        let centroid = best
            .moments()
            .centroid()
            .ok_or(TrackingDegenerate::ZeroArea)?;
        Point::within(centroid.x, centroid.y, frame.width(), frame.height())
            .ok_or(TrackingDegenerate::OutOfFrame)
    }

    pub fn track(&self, frame: &Frame) -> Option<Point> {
        self.track_detailed(frame).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    const BACKGROUND: Rgb<u8> = Rgb([50, 50, 50]);

    fn frame_with(rects: &[(u32, u32, u32, u32, Rgb<u8>)]) -> Frame {
        let mut image = RgbImage::from_pixel(120, 90, BACKGROUND);
        for &(x0, y0, w, h, color) in rects {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    image.put_pixel(x, y, color);
                }
            }
        }
        Frame::new(image, Utc::now(), 0)
    }

    /// Fully saturated, full-value color for an 8-bit (half-degree) hue.
    fn rgb_for_hue(hue: u8) -> Rgb<u8> {
        let degrees = hue as f32 * 2.0;
        let sector = (degrees / 60.0).floor() as u32 % 6;
        let f = degrees / 60.0 - (degrees / 60.0).floor();
        let rising = (255.0 * f).round() as u8;
        let falling = (255.0 * (1.0 - f)).round() as u8;
        match sector {
            0 => Rgb([255, rising, 0]),
            1 => Rgb([falling, 255, 0]),
            2 => Rgb([0, 255, rising]),
            3 => Rgb([0, falling, 255]),
            4 => Rgb([rising, 0, 255]),
            _ => Rgb([255, 0, falling]),
        }
    }

    fn calibrated(frame: &Frame, at: Point) -> ColorTracker {
        let mut tracker = ColorTracker::new(ColorSettings::default());
        tracker.calibrate(frame, at).unwrap();
        tracker
    }

    #[test]
    fn uncalibrated_tracker_reports_why() {
        let frame = frame_with(&[(10, 10, 20, 20, Rgb([0, 200, 0]))]);
        let tracker = ColorTracker::new(ColorSettings::default());
        assert_eq!(
            tracker.track_detailed(&frame),
            Err(TrackingDegenerate::Uncalibrated)
        );
    }

    #[test]
    fn calibration_outside_frame_is_rejected() {
        let frame = frame_with(&[]);
        let mut tracker = ColorTracker::new(ColorSettings::default());
        let err = tracker.calibrate(&frame, Point::new(120.0, 5.0)).unwrap_err();
        assert_eq!(err, CaptureError::CalibrationOutOfFrame { x: 120.0, y: 5.0 });
        assert!(!tracker.is_calibrated());
    }

    #[test]
    fn recalibration_overwrites_target() {
        let frame = frame_with(&[
            (0, 0, 20, 20, Rgb([0, 200, 0])),
            (60, 60, 20, 20, Rgb([0, 0, 200])),
        ]);
        let mut tracker = ColorTracker::new(ColorSettings::default());
        assert_eq!(tracker.calibrate(&frame, Point::new(5.0, 5.0)), Ok(60));
        assert_eq!(tracker.calibrate(&frame, Point::new(65.0, 65.0)), Ok(120));
        assert_eq!(tracker.target_hue(), Some(120));
    }

    #[test]
    fn centroid_lands_in_region_for_every_hue() {
        for hue in (0u8..180).step_by(9) {
            let color = rgb_for_hue(hue);
            let frame = frame_with(&[(40, 30, 24, 18, color)]);
            let tracker = calibrated(&frame, Point::new(50.0, 40.0));
            let point = tracker
                .track(&frame)
                .unwrap_or_else(|| panic!("hue {hue} was not tracked"));
            assert!(
                (40.0..64.0).contains(&point.x) && (30.0..48.0).contains(&point.y),
                "hue {hue} tracked outside region: {point:?}"
            );
        }
    }

    #[test]
    fn centroid_of_square_is_its_center() {
        let frame = frame_with(&[(20, 30, 21, 11, Rgb([0, 200, 0]))]);
        let tracker = calibrated(&frame, Point::new(25.0, 35.0));
        let point = tracker.track(&frame).unwrap();
        assert!((point.x - 30.0).abs() < 1e-3, "{point:?}");
        assert!((point.y - 35.0).abs() < 1e-3, "{point:?}");
    }

    #[test]
    fn background_only_frame_yields_nothing() {
        let marker = frame_with(&[(10, 10, 20, 20, Rgb([0, 200, 0]))]);
        let tracker = calibrated(&marker, Point::new(15.0, 15.0));
        let empty = frame_with(&[]);
        assert_eq!(
            tracker.track_detailed(&empty),
            Err(TrackingDegenerate::NoContour)
        );
    }

    #[test]
    fn specks_smaller_than_the_kernel_are_removed() {
        let marker = frame_with(&[(10, 10, 20, 20, Rgb([0, 200, 0]))]);
        let tracker = calibrated(&marker, Point::new(15.0, 15.0));
        let noisy = frame_with(&[(70, 50, 2, 2, Rgb([0, 200, 0]))]);
        assert!(tracker.track(&noisy).is_none());
    }

    #[test]
    fn largest_region_wins() {
        let frame = frame_with(&[
            (5, 5, 10, 10, Rgb([0, 200, 0])),
            (60, 40, 30, 30, Rgb([0, 200, 0])),
        ]);
        let tracker = calibrated(&frame, Point::new(7.0, 7.0));
        let point = tracker.track(&frame).unwrap();
        assert!(point.x > 60.0 && point.y > 40.0, "{point:?}");
    }

    #[test]
    fn equal_regions_pick_the_first_in_raster_order() {
        let frame = frame_with(&[
            (70, 10, 12, 12, Rgb([0, 200, 0])),
            (10, 50, 12, 12, Rgb([0, 200, 0])),
        ]);
        let tracker = calibrated(&frame, Point::new(75.0, 15.0));
        let first = tracker.track(&frame).unwrap();
        for _ in 0..5 {
            assert_eq!(tracker.track(&frame), Some(first));
        }
        assert!(first.x > 70.0 && first.y < 22.0, "{first:?}");
    }

    #[test]
    fn off_hue_regions_are_ignored() {
        let frame = frame_with(&[
            (5, 5, 10, 10, Rgb([0, 200, 0])),
            (60, 40, 30, 30, Rgb([200, 0, 0])),
        ]);
        let tracker = calibrated(&frame, Point::new(7.0, 7.0));
        let point = tracker.track(&frame).unwrap();
        assert!(point.x < 15.0 && point.y < 15.0, "{point:?}");
    }
}
