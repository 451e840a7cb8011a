//! External contours and polygon moments.
//!
//! Borders come from `imageproc`'s Suzuki–Abe tracer. Only outer borders
//! with no parent are kept, i.e. components not nested inside a hole of
//! another component. The tracer scans in raster order, so contour indices
//! follow the raster position of each component's first pixel.

use image::GrayImage;
use imageproc::contours::{self, BorderType};
use imageproc::geometry::contour_area;
use imageproc::point::Point as PixelPoint;

use crate::models::Point;

/// Border pixels of one external component, in tracing order.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    points: Vec<PixelPoint<i32>>,
}

/// First-order polygon moments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// `(m10/m00, m01/m00)`, or `None` for a degenerate polygon.
    pub fn centroid(&self) -> Option<Point> {
        if self.m00.abs() <= f64::EPSILON {
            return None;
        }
        let cx = self.m10 / self.m00;
        let cy = self.m01 / self.m00;
        if !cx.is_finite() || !cy.is_finite() {
            return None;
        }
        Some(Point::new(cx as f32, cy as f32))
    }
}

impl Contour {
    pub fn points(&self) -> &[PixelPoint<i32>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Unsigned area of the polygon through the border pixel centers.
    pub fn area(&self) -> f64 {
        if self.points.len() < 3 {
            return 0.0;
        }
        contour_area(&self.points).abs()
    }

    /// Green's theorem moments of the border polygon, oriented so `m00 >= 0`.
    pub fn moments(&self) -> Moments {
        let n = self.points.len();
        if n < 3 {
            return Moments::default();
        }

        let mut a00 = 0.0f64;
        let mut a10 = 0.0f64;
        let mut a01 = 0.0f64;
        for (i, p0) in self.points.iter().enumerate() {
            let p1 = self.points[(i + 1) % n];
            let (x0, y0, x1, y1) = (p0.x as f64, p0.y as f64, p1.x as f64, p1.y as f64);
            let cross = x0 * y1 - x1 * y0;
            a00 += cross;
            a10 += cross * (x0 + x1);
            a01 += cross * (y0 + y1);
        }

        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Moments {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
        }
    }

    /// `(min_x, min_y, max_x, max_y)` of the border pixels.
    pub fn bounding_box(&self) -> Option<(i32, i32, i32, i32)> {
        let first = self.points.first()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(self.points.iter().fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y))
        }))
    }
}

/// Outer borders of every top-level foreground component of `mask`.
pub fn find_external_contours(mask: &GrayImage) -> Vec<Contour> {
    contours::find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| Contour { points: c.points })
        .collect()
}
