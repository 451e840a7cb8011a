//! Classical segmentation primitives used by the color tracker.
//!
//! Masks are `GrayImage`s where any non-zero pixel is foreground.

pub mod contour;
pub mod hsv;
pub mod morphology;

pub use contour::{find_external_contours, Contour, Moments};
pub use hsv::{hsv_at, threshold_mask, Hsv, HsvWindow};
pub use morphology::{close, dilate, erode, open};
