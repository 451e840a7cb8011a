use serde::{Deserialize, Serialize};

/// A position in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns the point only if it is finite and inside `[0,width)×[0,height)`.
    pub fn within(x: f32, y: f32, width: u32, height: u32) -> Option<Self> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
            return None;
        }
        Some(Self { x, y })
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Nearest pixel, clamped to the given bounds.
    pub fn to_pixel(&self, width: u32, height: u32) -> (u32, u32) {
        let x = self.x.round().clamp(0.0, width.saturating_sub(1) as f32);
        let y = self.y.round().clamp(0.0, height.saturating_sub(1) as f32);
        (x as u32, y as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_rejects_nan_and_edges() {
        assert!(Point::within(f32::NAN, 1.0, 10, 10).is_none());
        assert!(Point::within(1.0, f32::INFINITY, 10, 10).is_none());
        assert!(Point::within(10.0, 1.0, 10, 10).is_none());
        assert!(Point::within(-0.1, 1.0, 10, 10).is_none());
        assert_eq!(Point::within(9.9, 0.0, 10, 10), Some(Point::new(9.9, 0.0)));
    }
}
