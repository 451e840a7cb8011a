use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::map::map_colors;

/// 8-bit HSV: hue in `[0, 180)` (degrees halved), saturation and value in `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl From<Rgb<u8>> for Hsv {
    fn from(pixel: Rgb<u8>) -> Self {
        let [r, g, b] = pixel.0;
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let delta = max - min;

        let s = if max > 0.0 { delta * 255.0 / max } else { 0.0 };

        let mut h = if delta == 0.0 {
            0.0
        } else if max == rf {
            60.0 * (gf - bf) / delta
        } else if max == gf {
            120.0 + 60.0 * (bf - rf) / delta
        } else {
            240.0 + 60.0 * (rf - gf) / delta
        };
        if h < 0.0 {
            h += 360.0;
        }

        // Half-degree hue wraps 359.x° back to 0 instead of producing 180.
        let h = ((h / 2.0).round() as u16 % 180) as u8;

        Hsv {
            h,
            s: s.round().clamp(0.0, 255.0) as u8,
            v: max as u8,
        }
    }
}

/// Hue band plus saturation/value floors. Upper S/V bounds are always 255.
///
/// The hue band does not wrap around 0/180.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvWindow {
    pub target_hue: u8,
    pub tolerance: u8,
    pub min_saturation: u8,
    pub min_value: u8,
}

impl HsvWindow {
    pub fn hue_range(&self) -> (i16, i16) {
        let target = self.target_hue as i16;
        let tol = self.tolerance as i16;
        (target - tol, target + tol)
    }

    pub fn contains(&self, hsv: Hsv) -> bool {
        let (low, high) = self.hue_range();
        let h = hsv.h as i16;
        h >= low && h <= high && hsv.s >= self.min_saturation && hsv.v >= self.min_value
    }
}

pub fn hsv_at(image: &RgbImage, x: u32, y: u32) -> Hsv {
    Hsv::from(*image.get_pixel(x, y))
}

/// Binary mask (255 = inside the window) for every pixel of `image`.
pub fn threshold_mask(image: &RgbImage, window: &HsvWindow) -> GrayImage {
    map_colors(image, |pixel| {
        if window.contains(Hsv::from(pixel)) {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}
