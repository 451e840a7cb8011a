use image::{imageops, DynamicImage, Rgba, RgbaImage};

use crate::models::{Drawing, Frame, Point};
use crate::settings::RenderSettings;

use super::GuideSpiral;

pub const TRACE_COLOR: [u8; 3] = [0x3b, 0x82, 0xf6];
const GUIDE_PREVIEW: ([u8; 3], f32) = ([255, 255, 255], 0.4);
const GUIDE_SUBMISSION: ([u8; 3], f32) = ([0, 0, 0], 0.3);
const MARKER_COLOR: [u8; 3] = [0, 255, 0];
const MARKER_RADIUS: f32 = 10.0;
const MARKER_THICKNESS: f32 = 2.0;

/// Pixels touched by one stroke. Filled first and blended once, so
/// overlapping segments of a translucent stroke do not darken.
struct Coverage {
    width: u32,
    height: u32,
    hit: Vec<bool>,
}

impl Coverage {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            hit: vec![false; (width as usize) * (height as usize)],
        }
    }

    /// Marks every pixel whose center satisfies `inside`, within the given box.
    fn fill_box(&mut self, min: (f32, f32), max: (f32, f32), inside: impl Fn(f32, f32) -> bool) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let x0 = min.0.floor().max(0.0) as u32;
        let y0 = min.1.floor().max(0.0) as u32;
        let x1 = (max.0.ceil().max(0.0) as u32).min(self.width - 1);
        let y1 = (max.1.ceil().max(0.0) as u32).min(self.height - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                if inside(x as f32 + 0.5, y as f32 + 0.5) {
                    self.hit[(y * self.width + x) as usize] = true;
                }
            }
        }
    }

    fn segment(&mut self, a: Point, b: Point, half_width: f32) {
        if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
            return;
        }
        let min = (a.x.min(b.x) - half_width, a.y.min(b.y) - half_width);
        let max = (a.x.max(b.x) + half_width, a.y.max(b.y) + half_width);
        self.fill_box(min, max, |px, py| {
            distance_to_segment(Point::new(px, py), a, b) <= half_width
        });
    }

    fn ring(&mut self, center: Point, radius: f32, thickness: f32) {
        let half = thickness / 2.0;
        let reach = radius + half;
        self.fill_box(
            (center.x - reach, center.y - reach),
            (center.x + reach, center.y + reach),
            |px, py| (Point::new(px, py).distance(&center) - radius).abs() <= half,
        );
    }

    fn blend_into(&self, canvas: &mut RgbaImage, color: [u8; 3], alpha: f32) {
        for (i, hit) in self.hit.iter().enumerate() {
            if *hit {
                let x = i as u32 % self.width;
                let y = i as u32 / self.width;
                blend_pixel(canvas.get_pixel_mut(x, y), color, alpha);
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return p.distance(&a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * dx, a.y + t * dy))
}

/// Source-over with straight alpha.
fn blend_pixel(dst: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let src_a = alpha.clamp(0.0, 1.0);
    let dst_a = dst.0[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }
    for c in 0..3 {
        let src = color[c] as f32;
        let under = dst.0[c] as f32;
        let value = (src * src_a + under * dst_a * (1.0 - src_a)) / out_a;
        dst.0[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Strokes a polyline with round joins and caps.
pub fn stroke_polyline(canvas: &mut RgbaImage, points: &[Point], color: [u8; 3], alpha: f32, width: f32) {
    let mut coverage = Coverage::new(canvas.width(), canvas.height());
    let half = width / 2.0;
    match points {
        [] => return,
        [only] => coverage.segment(*only, *only, half),
        _ => {
            for pair in points.windows(2) {
                coverage.segment(pair[0], pair[1], half);
            }
        }
    }
    coverage.blend_into(canvas, color, alpha);
}

fn stroke_drawing(canvas: &mut RgbaImage, drawing: &Drawing, width: f32) {
    for path in drawing.paths() {
        if path.len() < 2 {
            continue;
        }
        stroke_polyline(canvas, path.points(), TRACE_COLOR, 1.0, width);
    }
}

/// What the operator sees: camera frame, guide, strokes so far, and the tracking marker.
pub fn render_preview(
    frame: &Frame,
    mirrored: bool,
    spiral: &GuideSpiral,
    drawing: &Drawing,
    marker: Option<Point>,
    settings: &RenderSettings,
) -> RgbaImage {
    let base = if mirrored {
        imageops::flip_horizontal(frame.image())
    } else {
        frame.image().clone()
    };
    let mut canvas = DynamicImage::ImageRgb8(base).into_rgba8();

    let (guide_color, guide_alpha) = GUIDE_PREVIEW;
    stroke_polyline(&mut canvas, &spiral.polyline(), guide_color, guide_alpha, settings.guide_width);
    stroke_drawing(&mut canvas, drawing, settings.stroke_width);

    if let Some(center) = marker {
        let mut ring = Coverage::new(canvas.width(), canvas.height());
        ring.ring(center, MARKER_RADIUS, MARKER_THICKNESS);
        ring.blend_into(&mut canvas, MARKER_COLOR, 1.0);
    }

    canvas
}

/// The image sent for scoring: transparent background, faint guide, strokes.
pub fn render_submission(
    width: u32,
    height: u32,
    spiral: &GuideSpiral,
    drawing: &Drawing,
    settings: &RenderSettings,
) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    let (guide_color, guide_alpha) = GUIDE_SUBMISSION;
    stroke_polyline(&mut canvas, &spiral.polyline(), guide_color, guide_alpha, settings.guide_width);
    stroke_drawing(&mut canvas, drawing, settings.stroke_width);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    fn line_drawing(from: Point, to: Point) -> Drawing {
        let mut drawing = Drawing::new();
        drawing.start_stroke();
        drawing.append(from);
        drawing.append(to);
        drawing.stop_stroke();
        drawing
    }

    #[test]
    fn submission_has_transparent_background_and_opaque_trace() {
        let spiral = GuideSpiral::for_canvas(200, 200, 2.5, 0.05);
        let drawing = line_drawing(Point::new(10.0, 180.0), Point::new(60.0, 180.0));
        let canvas = render_submission(200, 200, &spiral, &drawing, &RenderSettings::default());

        assert_eq!(canvas.get_pixel(190, 5).0[3], 0);
        assert_eq!(canvas.get_pixel(30, 180), &Rgba([0x3b, 0x82, 0xf6, 255]));

        // Guide is black at 30% opacity.
        let on_guide = spiral.point_at(spiral.max_angle());
        let (gx, gy) = on_guide.to_pixel(200, 200);
        let guide = canvas.get_pixel(gx, gy);
        assert_eq!(&guide.0[..3], &[0, 0, 0]);
        assert_eq!(guide.0[3], 77);
    }

    #[test]
    fn single_point_paths_are_not_drawn() {
        let mut drawing = Drawing::new();
        drawing.start_stroke();
        drawing.append(Point::new(20.0, 20.0));
        let spiral = GuideSpiral::for_canvas(100, 100, 0.0, 0.05);
        let canvas = render_submission(100, 100, &spiral, &drawing, &RenderSettings::default());
        assert_eq!(canvas.get_pixel(20, 20).0[3], 0);
    }

    #[test]
    fn translucent_stroke_does_not_darken_where_segments_overlap() {
        let mut canvas = RgbaImage::new(40, 40);
        let zigzag = [
            Point::new(5.0, 20.0),
            Point::new(20.0, 20.0),
            Point::new(5.0, 20.5),
        ];
        stroke_polyline(&mut canvas, &zigzag, [0, 0, 0], 0.3, 4.0);
        assert_eq!(canvas.get_pixel(10, 20).0[3], 77);
    }

    #[test]
    fn preview_is_mirrored_and_marker_is_not_on_the_frame() {
        let mut image = RgbImage::from_pixel(100, 60, Rgb([10, 10, 10]));
        image.put_pixel(0, 59, Rgb([200, 0, 0]));
        let frame = Frame::new(image, Utc::now(), 3);
        let spiral = GuideSpiral::for_canvas(100, 60, 0.0, 0.05);
        let marker = Some(Point::new(50.0, 30.0));

        let preview = render_preview(
            &frame,
            true,
            &spiral,
            &Drawing::new(),
            marker,
            &RenderSettings::default(),
        );
        assert_eq!(preview.get_pixel(99, 59), &Rgba([200, 0, 0, 255]));
        assert_eq!(preview.get_pixel(60, 30), &Rgba([0, 255, 0, 255]));
        assert_eq!(preview.get_pixel(45, 30), &Rgba([10, 10, 10, 255]));
        assert_eq!(frame.pixel(60, 30), Some(Rgb([10, 10, 10])));
    }
}
