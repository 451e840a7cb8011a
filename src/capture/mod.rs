pub mod controller;
pub mod loop_worker;
pub mod render;
pub mod spiral;
pub mod state;

pub use controller::{CaptureController, CaptureSnapshot, SubmissionReport};
pub use loop_worker::FrameLoop;
pub use spiral::GuideSpiral;
pub use state::{next_status, CaptureEvent, CaptureSession, CaptureStatus};
