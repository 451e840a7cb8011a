//! Binary morphology with a square structuring element.
//!
//! `kernel` is the side of the square (5 means 5×5). Pixels outside the
//! image count as neither foreground nor background, so the image edge does
//! not erode a blob that touches it.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;

/// Chessboard radius of a square kernel with side `kernel`.
fn radius(kernel: u32) -> u8 {
    (kernel / 2).min(u8::MAX as u32) as u8
}

pub fn erode(mask: &GrayImage, kernel: u32) -> GrayImage {
    morphology::erode(mask, Norm::LInf, radius(kernel))
}

pub fn dilate(mask: &GrayImage, kernel: u32) -> GrayImage {
    morphology::dilate(mask, Norm::LInf, radius(kernel))
}

/// Erode then dilate: removes specks smaller than the kernel.
pub fn open(mask: &GrayImage, kernel: u32) -> GrayImage {
    morphology::open(mask, Norm::LInf, radius(kernel))
}

/// Dilate then erode: fills holes smaller than the kernel.
pub fn close(mask: &GrayImage, kernel: u32) -> GrayImage {
    morphology::close(mask, Norm::LInf, radius(kernel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        let mut mask = GrayImage::new(w, h);
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    fn count_on(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn kernel_side_maps_to_radius() {
        assert_eq!(radius(5), 2);
        assert_eq!(radius(1), 0);
        assert_eq!(radius(10_000), u8::MAX);
    }

    #[test]
    fn open_removes_isolated_speck() {
        let mut mask = square(40, 40, 10, 10, 10);
        mask.put_pixel(35, 35, Luma([255]));
        let opened = open(&mask, 5);
        assert_eq!(opened.get_pixel(35, 35).0[0], 0);
        assert_eq!(count_on(&opened), 100);
    }

    #[test]
    fn close_fills_small_hole() {
        let mut mask = square(40, 40, 10, 10, 10);
        mask.put_pixel(15, 15, Luma([0]));
        let closed = close(&mask, 5);
        assert_eq!(closed.get_pixel(15, 15).0[0], 255);
        assert_eq!(count_on(&closed), 100);
    }

    #[test]
    fn erode_shrinks_by_the_radius() {
        let mask = square(40, 40, 10, 10, 10);
        assert_eq!(count_on(&erode(&mask, 5)), 36);
        assert_eq!(count_on(&dilate(&mask, 5)), 196);
    }

    #[test]
    fn blob_touching_the_border_survives_open() {
        let mask = square(20, 20, 0, 0, 6);
        let opened = open(&mask, 5);
        assert_eq!(count_on(&opened), 36);
    }
}
