mod drawing;
mod frame;
mod point;

pub use drawing::{Drawing, Path};
pub use frame::{Frame, Resolution};
pub use point::Point;
