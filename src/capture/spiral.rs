use std::f32::consts::TAU;

use serde::Serialize;

use crate::models::Point;

/// Archimedean guide spiral, `r(θ) = max_radius · θ / max_angle`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideSpiral {
    pub center: Point,
    pub max_radius: f32,
    pub turns: f32,
    pub angle_step: f32,
}

impl GuideSpiral {
    /// Centered on the canvas with `max_radius = min(width, height) / 4`.
    pub fn for_canvas(width: u32, height: u32, turns: f32, angle_step: f32) -> Self {
        Self {
            center: Point::new(width as f32 / 2.0, height as f32 / 2.0),
            max_radius: width.min(height) as f32 / 4.0,
            turns,
            angle_step,
        }
    }

    pub fn max_angle(&self) -> f32 {
        self.turns * TAU
    }

    pub fn radius_at(&self, angle: f32) -> f32 {
        let max_angle = self.max_angle();
        if max_angle <= 0.0 {
            return 0.0;
        }
        self.max_radius * angle / max_angle
    }

    pub fn point_at(&self, angle: f32) -> Point {
        let r = self.radius_at(angle);
        Point::new(
            self.center.x + r * angle.cos(),
            self.center.y + r * angle.sin(),
        )
    }

    /// Samples at `0, step, 2·step, …` up to and including `max_angle`.
    pub fn polyline(&self) -> Vec<Point> {
        let max_angle = self.max_angle();
        if self.angle_step <= 0.0 || max_angle <= 0.0 {
            return vec![self.center];
        }
        let mut points = Vec::new();
        let mut i = 0u32;
        loop {
            let angle = i as f32 * self.angle_step;
            if angle > max_angle {
                break;
            }
            points.push(self.point_at(angle));
            i += 1;
        }
        points
    }
}

impl Default for GuideSpiral {
    fn default() -> Self {
        Self::for_canvas(640, 480, 2.5, 0.05)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_runs_from_zero_to_max() {
        let spiral = GuideSpiral::for_canvas(640, 480, 2.5, 0.05);
        assert_eq!(spiral.max_radius, 120.0);
        assert_eq!(spiral.radius_at(0.0), 0.0);
        assert!((spiral.radius_at(spiral.max_angle()) - spiral.max_radius).abs() < 1e-4);
        assert_eq!(spiral.point_at(0.0), spiral.center);
    }

    #[test]
    fn polyline_starts_at_center_and_stays_inside_max_radius() {
        let spiral = GuideSpiral::default();
        let points = spiral.polyline();
        assert_eq!(points[0], Point::new(320.0, 240.0));
        // 2.5 turns at 0.05 rad: floor(15.707 / 0.05) + 1 samples.
        assert_eq!(points.len(), 315);
        for p in &points {
            assert!(p.distance(&spiral.center) <= spiral.max_radius + 1e-3);
        }
    }

    #[test]
    fn degenerate_step_yields_only_center() {
        let spiral = GuideSpiral::for_canvas(100, 100, 2.5, 0.0);
        assert_eq!(spiral.polyline(), vec![Point::new(50.0, 50.0)]);
    }
}
